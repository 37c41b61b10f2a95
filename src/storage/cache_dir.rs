use std::path::PathBuf;

/// Default build cache directory
///
/// - Linux/Unix: $XDG_CACHE_HOME/taskout or ~/.cache/taskout
/// - macOS: ~/Library/Caches/taskout
/// - Windows: %LOCALAPPDATA%/taskout
pub fn default_cache_dir() -> PathBuf {
    if let Some(cache_dir) = dirs::cache_dir() {
        cache_dir.join("taskout")
    } else {
        PathBuf::from(".taskout/cache")
    }
}
