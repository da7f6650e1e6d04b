//! Prefix/suffix decomposition for previews.
//!
//! Splits one or more source names and a destination name into a shared
//! prefix, a shared suffix, and the distinct middle of each, so a terminal
//! can highlight only what changes.

/// The pieces of a source(s) → destination change.
///
/// Every input equals `prefix + middle + suffix`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decomposition {
    pub prefix: String,
    /// The middle of each source, in input order.
    pub sources: Vec<String>,
    pub destination: String,
    pub suffix: String,
}

/// Decomposes `sources` and `destination` around their longest common
/// prefix and suffix.
///
/// Both are computed character by character, aligned from the start and
/// the end respectively, then the suffix is shortened so that the two never
/// overlap in the shortest string.
///
/// ```
/// use metatask_pipeline::diff::decompose;
///
/// let parts = decompose(&["IMG_1.JPG"], "photo_1.jpg");
/// assert_eq!(parts.prefix, "");
/// assert_eq!(parts.sources, ["IMG_1.JPG"]);
/// ```
pub fn decompose<S: AsRef<str>>(sources: &[S], destination: &str) -> Decomposition {
    let all: Vec<Vec<char>> =
        sources.iter().map(|s| s.as_ref().chars().collect()).chain([destination.chars().collect()]).collect();
    let shortest = all.iter().map(Vec::len).min().unwrap_or(0);

    let prefix = (0..shortest).take_while(|&i| all.iter().all(|s| s[i] == all[0][i])).count();
    let suffix = (1..=shortest)
        .take_while(|&i| all.iter().all(|s| s[s.len() - i] == all[0][all[0].len() - i]))
        .count()
        .min(shortest - prefix);

    let middle = |s: &[char]| s[prefix..s.len() - suffix].iter().collect::<String>();
    let reference = &all[0];
    Decomposition {
        prefix: reference[..prefix].iter().collect(),
        sources: all[..all.len() - 1].iter().map(|s| middle(s)).collect(),
        destination: middle(&all[all.len() - 1]),
        suffix: reference[reference.len() - suffix..].iter().collect(),
    }
}
