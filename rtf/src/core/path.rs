//! Helpers for deriving node names and order from directory names.

use std::sync::LazyLock;

use regex::Regex;

static ORDER_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)_(.+)$").unwrap());

/// Split a directory name into `(order, local_name)`.
///
/// `010_network` becomes `(10, "network")`. Names without a numeric prefix
/// keep their full text and get order `0`.
pub fn name_and_order(dir_name: &str) -> (i64, &str) {
    match ORDER_PREFIX.captures(dir_name) {
        Some(caps) => {
            let (Some(order), Some(name)) = (caps.get(1), caps.get(2)) else {
                return (0, dir_name);
            };
            match order.as_str().parse::<i64>() {
                Ok(order) => (order, name.as_str()),
                // Absurdly long prefixes still strip, but sort first.
                Err(_) => (0, name.as_str()),
            }
        }
        None => (0, dir_name),
    }
}

/// Compose a canonical dotted name from the parent's name and a local name.
pub fn child_name(parent: &str, local: &str) -> String {
    format!("{parent}.{local}")
}
