use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};

use crate::types::OutputStream;

/// Logger for one build task.
///
/// Messages go to `tracing` and, once a log file is attached, are mirrored
/// into it line by line.
#[derive(Clone, Default)]
pub struct TaskLogger {
    file: Option<Arc<Mutex<File>>>,
    path: Option<PathBuf>,
}

impl TaskLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        Ok(Self {
            file: Some(Arc::new(Mutex::new(file))),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn write_to_file(&self, msg: impl AsRef<str>) {
        if let Some(ref file) = self.file {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{}", msg.as_ref());
            }
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        tracing::info!("{}", msg.as_ref());
        self.write_to_file(msg);
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        tracing::warn!("{}", msg.as_ref());
        self.write_to_file(msg);
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        tracing::error!("{}", msg.as_ref());
        self.write_to_file(msg);
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        tracing::debug!("{}", msg.as_ref());
        self.write_to_file(msg);
    }

    /// Run `command` to completion, streaming its output through this logger.
    pub fn run(&self, command: &mut Command) -> io::Result<ExitStatus> {
        self.debug(format!("Running {:?}", command));
        let mut child = spawn(
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped()),
        )?;
        self.stream_output(&mut child);
        child.wait()
    }

    fn stream_output(&self, child: &mut Child) {
        let (tx, rx) = mpsc::channel();
        let logger = self.clone();

        let output_handle = thread::spawn(move || {
            while let Ok(output) = rx.recv() {
                match output {
                    OutputStream::Stdout(msg) => logger.info(&msg),
                    OutputStream::Stderr(msg) => logger.warn(&msg),
                }
            }
        });

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone(), OutputStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx.clone(), OutputStream::Stderr));
        }
        drop(tx);

        for reader in readers {
            let _ = reader.join();
        }
        let _ = output_handle.join();
    }
}

const ETXTBSY: i32 = 26;

/// Spawn `command`, retrying briefly while a freshly written executable is
/// still held open for writing.
pub fn spawn(command: &mut Command) -> io::Result<Child> {
    let mut attempts = 0;
    loop {
        match command.spawn() {
            Err(e) if e.raw_os_error() == Some(ETXTBSY) && attempts < 10 => {
                attempts += 1;
                thread::sleep(Duration::from_millis(50));
            }
            result => return result,
        }
    }
}

fn forward_lines<R>(
    stream: R,
    tx: mpsc::Sender<OutputStream>,
    wrap: fn(String) -> OutputStream,
) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    // raw split so a non UTF-8 line never stops draining the pipe
    thread::spawn(move || {
        BufReader::new(stream)
            .split(b'\n')
            .map_while(Result::ok)
            .for_each(|mut line| {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let _ = tx.send(wrap(String::from_utf8_lossy(&line).into_owned()));
            })
    })
}
