//! Dotted frame kinds.
//!
//! Servers name frames either by a bare class name (`MessageOutputChannelEvent`)
//! or by a fully qualified one (`com.example.MessageOutputChannelEvent`). Only
//! the last segment is significant.

/// Longest kind [`short_kind`] returns before truncating.
const SHORT_KIND_MAX: usize = 20;

/// Last dotted segment of `kind`.
pub fn kind_name(kind: &str) -> &str {
    kind.rsplit('.').next().unwrap_or(kind)
}

/// Display form of `kind`: the last segment, truncated to 20 characters.
pub fn short_kind(kind: &str) -> String {
    let name = kind_name(kind);
    if name.chars().count() > SHORT_KIND_MAX {
        let truncated: String = name.chars().take(SHORT_KIND_MAX).collect();
        format!("{truncated}...")
    } else {
        name.to_string()
    }
}
