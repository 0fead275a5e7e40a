use std::fmt::Display;

pub enum OutputStream {
    Stdout(String),
    Stderr(String),
}

/// Where the source tree came from; decides whether generation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    ReleaseArchive,
    DevelopmentBranch,
}

impl Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::ReleaseArchive => write!(f, "release archive"),
            Provenance::DevelopmentBranch => write!(f, "development branch"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Staging,
    Generating,
    Building,
    Installing,
    Verifying,
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Staging => write!(f, "staging"),
            Phase::Generating => write!(f, "generating"),
            Phase::Building => write!(f, "building"),
            Phase::Installing => write!(f, "installing"),
            Phase::Verifying => write!(f, "verifying"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Static,
    Dynamic,
    MachO,
    Script,
    Unknown,
}

impl Display for BinaryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryKind::Static => write!(f, "static"),
            BinaryKind::Dynamic => write!(f, "dynamic"),
            BinaryKind::MachO => write!(f, "mach-o"),
            BinaryKind::Script => write!(f, "script"),
            BinaryKind::Unknown => write!(f, "unknown"),
        }
    }
}
