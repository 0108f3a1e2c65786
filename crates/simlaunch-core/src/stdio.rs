//! Stdio bridge: FIFOs for the simulated app's stdout/stderr
//!
//! Each run gets a private directory holding two FIFOs. The host side opens
//! them read-write, so a reader always exists for the app to connect to and
//! the stream never sees EOF when the app closes its end. Pumps copy bytes to
//! their destination until [`StdioBridge::close`] is called.

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use simlaunch_util::{RunId, default_stdio_dir};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Child environment variable naming the stdout FIFO
pub const STDOUT_PATH_ENV: &str = "SIMLAUNCH_STDOUT";

/// Child environment variable naming the stderr FIFO
pub const STDERR_PATH_ENV: &str = "SIMLAUNCH_STDERR";

const READ_CHUNK: usize = 8192;

/// Upper bound on reads when draining a FIFO at close
const MAX_DRAIN_READS: usize = 128;

/// Where one bridged channel ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdioDestination {
    /// The controller's own stdout/stderr
    Inherit,
    /// Appended to a file (created if missing)
    File(PathBuf),
}

impl StdioDestination {
    pub fn from_path(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => StdioDestination::File(path),
            None => StdioDestination::Inherit,
        }
    }
}

/// FIFO paths handed to the device layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioPaths {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    fn name(self) -> &'static str {
        match self {
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
        }
    }
}

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// Owns the FIFOs and the two pump tasks reading them
pub struct StdioBridge {
    run_dir: PathBuf,
    paths: StdioPaths,
    shutdown_tx: watch::Sender<bool>,
    pumps: Vec<JoinHandle<io::Result<u64>>>,
    closed: bool,
}

impl StdioBridge {
    /// Open a bridge under the default runtime directory
    pub async fn open(stdout: StdioDestination, stderr: StdioDestination) -> io::Result<Self> {
        Self::open_in(&default_stdio_dir(), stdout, stderr).await
    }

    /// Open a bridge under `base`.
    ///
    /// Nothing is left on disk if this fails.
    pub async fn open_in(
        base: &Path,
        stdout: StdioDestination,
        stderr: StdioDestination,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(base)?;

        let run_dir = base.join(format!("run-{}", RunId::new().short()));
        std::fs::create_dir(&run_dir)?;
        std::fs::set_permissions(&run_dir, std::fs::Permissions::from_mode(0o700))?;

        let paths = StdioPaths {
            stdout: run_dir.join("stdout"),
            stderr: run_dir.join("stderr"),
        };

        match Self::start_pumps(&paths, stdout, stderr).await {
            Ok((shutdown_tx, pumps)) => {
                debug!(dir = %run_dir.display(), "Stdio bridge open");
                Ok(Self {
                    run_dir,
                    paths,
                    shutdown_tx,
                    pumps,
                    closed: false,
                })
            }
            Err(e) => {
                remove_paths(&paths, &run_dir);
                Err(e)
            }
        }
    }

    async fn start_pumps(
        paths: &StdioPaths,
        stdout: StdioDestination,
        stderr: StdioDestination,
    ) -> io::Result<(watch::Sender<bool>, Vec<JoinHandle<io::Result<u64>>>)> {
        make_fifo(&paths.stdout)?;
        make_fifo(&paths.stderr)?;

        let out_rx = open_fifo(&paths.stdout)?;
        let err_rx = open_fifo(&paths.stderr)?;
        let out_sink = open_sink(&stdout, Channel::Stdout).await?;
        let err_sink = open_sink(&stderr, Channel::Stderr).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pumps = vec![
            tokio::spawn(pump(Channel::Stdout, out_rx, out_sink, shutdown_rx.clone())),
            tokio::spawn(pump(Channel::Stderr, err_rx, err_sink, shutdown_rx)),
        ];

        Ok((shutdown_tx, pumps))
    }

    /// The FIFO paths to inject into the child environment
    pub fn paths(&self) -> &StdioPaths {
        &self.paths
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop both pumps, flush what is buffered and remove the FIFOs.
    ///
    /// Only the first call does anything.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            debug!("Stdio bridge already closed");
            return Ok(());
        }
        self.closed = true;

        self.shutdown_tx.send_replace(true);

        for pump in self.pumps.drain(..) {
            match pump.await {
                Ok(Ok(bytes)) => debug!(bytes, "Stdio pump finished"),
                Ok(Err(e)) => warn!(error = %e, "Stdio pump failed"),
                Err(e) => warn!(error = %e, "Stdio pump panicked"),
            }
        }

        let result = remove_fifo(&self.paths.stdout).and(remove_fifo(&self.paths.stderr));
        if let Err(e) = std::fs::remove_dir(&self.run_dir)
            && e.kind() != io::ErrorKind::NotFound
        {
            debug!(dir = %self.run_dir.display(), error = %e, "Could not remove stdio directory");
        }

        debug!("Stdio bridge closed");
        result
    }
}

impl Drop for StdioBridge {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        for pump in &self.pumps {
            pump.abort();
        }
        remove_paths(&self.paths, &self.run_dir);
    }
}

fn make_fifo(path: &Path) -> io::Result<()> {
    mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)
}

/// Open read-write so the open never blocks and EOF never arrives
fn open_fifo(path: &Path) -> io::Result<pipe::Receiver> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)?;
    pipe::Receiver::from_file(file)
}

async fn open_sink(destination: &StdioDestination, channel: Channel) -> io::Result<Sink> {
    Ok(match (destination, channel) {
        (StdioDestination::Inherit, Channel::Stdout) => Box::new(tokio::io::stdout()),
        (StdioDestination::Inherit, Channel::Stderr) => Box::new(tokio::io::stderr()),
        (StdioDestination::File(path), _) => Box::new(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?,
        ),
    })
}

/// Remove a FIFO; already gone is fine
fn remove_fifo(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn remove_paths(paths: &StdioPaths, run_dir: &Path) {
    let _ = remove_fifo(&paths.stdout);
    let _ = remove_fifo(&paths.stderr);
    let _ = std::fs::remove_dir(run_dir);
}

async fn pump(
    channel: Channel,
    mut rx: pipe::Receiver,
    mut sink: Sink,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<u64> {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            read = rx.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    sink.write_all(&buf[..n]).await?;
                    sink.flush().await?;
                    total += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            },
        }
    }

    // Whatever the app wrote before close still belongs to the run
    for _ in 0..MAX_DRAIN_READS {
        match rx.try_read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                sink.write_all(&buf[..n]).await?;
                total += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    sink.flush().await?;

    debug!(channel = channel.name(), bytes = total, "Stdio pump stopped");
    Ok(total)
}
