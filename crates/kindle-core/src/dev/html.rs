//! Entry page discovery and bootstrap injection.

use crate::resolver::PACKAGES_DIR;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Script that opens the live-update socket.
pub const LIVE_UPDATE_ROUTE: &str = "/@bootstrap/live-update";

/// Script defining the refresh registration globals.
pub const REFRESH_SHIM_ROUTE: &str = "/@bootstrap/refresh-shim";

/// Locations checked, in order, before walking the project.
pub const INDEX_CANDIDATES: &[&str] = &[
    "index.html",
    "public/index.html",
    "static/index.html",
    "app/index.html",
];

const INDEX_FILE: &str = "index.html";

/// Find the project's entry page.
///
/// Checks [`INDEX_CANDIDATES`] first, then walks the project (skipping the
/// dependency directory) and returns the first `index.html` found.
#[must_use]
pub fn find_index_html(root: &Path) -> Option<PathBuf> {
    for candidate in INDEX_CANDIDATES {
        let path = root.join(candidate);
        if path.is_file() {
            return Some(path);
        }
    }

    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != PACKAGES_DIR)
        .filter_map(Result::ok)
        .find(|e| e.file_type().is_file() && e.file_name() == INDEX_FILE)
        .map(|e| e.into_path())
}

/// The three bootstrap tags: live-update client, refresh shim, entry module.
#[must_use]
pub fn bootstrap_tags(entry: &str) -> String {
    format!(
        "<script type=\"module\" src=\"{LIVE_UPDATE_ROUTE}\"></script>\n\
         <script type=\"module\" src=\"{REFRESH_SHIM_ROUTE}\"></script>\n\
         <script type=\"module\" src=\"{entry}\"></script>\n"
    )
}

/// Insert the bootstrap tags before the last `</body>`, or append them when
/// the page has no closing body tag.
#[must_use]
pub fn inject_bootstrap(html: &str, entry: &str) -> String {
    let tags = bootstrap_tags(entry);
    let lower = html.to_ascii_lowercase();

    match lower.rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + tags.len());
            out.push_str(&html[..pos]);
            out.push_str(&tags);
            out.push_str(&html[pos..]);
            out
        }
        None => {
            let mut out = html.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&tags);
            out
        }
    }
}
