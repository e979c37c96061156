use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

type FileLayerBox = Box<dyn Layer<Registry> + Send + Sync>;

static FILE_HANDLE: OnceCell<reload::Handle<Option<FileLayerBox>, Registry>> = OnceCell::new();

/// Initializes console logging with an env-filter plus an initially empty
/// slot for a per-job file layer. Idempotent; later calls are no-ops.
pub fn init() {
    let (file_layer, handle) = reload::Layer::new(None::<FileLayerBox>);
    let console = fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    if tracing_subscriber::registry().with(file_layer).with(console).try_init().is_ok() {
        let _ = FILE_HANDLE.set(handle);
    }
}

/// Owner of a file log layer attached for the duration of one job. Dropping
/// the guard detaches the layer on every exit path.
pub struct LogFileGuard {
    active: bool,
}

impl Drop for LogFileGuard {
    fn drop(&mut self) {
        if self.active {
            if let Some(handle) = FILE_HANDLE.get() {
                let _ = handle.modify(|slot| *slot = None);
            }
        }
    }
}

/// Attaches a DEBUG-level file layer writing to `path`, returning the guard
/// that detaches it again. When `init` has not run, the request is ignored
/// with a warning instead of failing the job.
pub fn attach_log_file(path: &Path) -> std::io::Result<LogFileGuard> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;

    let Some(handle) = FILE_HANDLE.get() else {
        warn!("logging is not initialized, ignoring requested log file {}", path.display());
        return Ok(LogFileGuard { active: false });
    };

    let layer: FileLayerBox =
        fmt::layer().with_ansi(false).with_writer(Arc::new(file)).with_filter(LevelFilter::DEBUG).boxed();
    handle
        .modify(|slot| *slot = Some(layer))
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    info!("logging console logs and further debug information to: {}", path.display());
    Ok(LogFileGuard { active: true })
}
