/// Render the `--version` text: the version, then the commit and build date
/// on their own lines when known.
pub fn build_version(version: &str, commit: &str, date: &str) -> String {
    let mut result = version.to_string();
    if !commit.is_empty() {
        result.push_str(&format!("\ncommit: {commit}"));
    }
    if !date.is_empty() {
        result.push_str(&format!("\nbuilt at: {date}"));
    }
    result
}
