/// Normalizes free text for matching.
///
/// Lowercases with full Unicode case mapping, collapses whitespace runs into a single ASCII
/// space and trims both ends. Keywords and queries must go through the same function.
pub fn normalize(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());
	let mut pending_space = false;

	for ch in raw.chars() {
		if ch.is_whitespace() {
			pending_space = !out.is_empty();
			continue;
		}
		if pending_space {
			out.push(' ');
			pending_space = false;
		}
		out.extend(ch.to_lowercase());
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn collapses_and_trims_whitespace() {
		assert_eq!(normalize("  File \t\n  Manager  "), "file manager");
	}

	#[test]
	fn folds_non_ascii_case() {
		assert_eq!(normalize("ÉCRAN Ärger"), "écran ärger");
		assert_eq!(normalize("İ"), "i\u{307}");
	}

	#[test]
	fn whitespace_only_is_empty() {
		assert_eq!(normalize(" \t\u{a0}\n"), "");
	}
}
