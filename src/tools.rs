// External tool resolver for ffprobe
//
// Resolution order:
// 1) Environment variable override (BIRDBOX_FFPROBE_PATH)
// 2) Sidecar next to the executable
// 3) PATH fallback

use std::env;
use std::path::PathBuf;

/// Get the directory containing the current executable
fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
    }

    if let Some(dir) = exe_dir() {
        let candidate = dir.join(default_name);
        if candidate.exists() {
            return candidate;
        }
    }

    PathBuf::from(default_name)
}

/// Get path to ffprobe binary
pub fn ffprobe_path() -> PathBuf {
    resolve_tool("BIRDBOX_FFPROBE_PATH", "ffprobe")
}
