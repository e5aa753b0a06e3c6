use super::*;
use crate::normalize;

fn needle(query: &str) -> Needle {
	Needle::new(&normalize(query), &Config::default()).expect("non-empty query")
}

fn kw(label: &str) -> Vec<String> {
	vec![normalize(label)]
}

#[test]
fn empty_query_has_no_needle() {
	assert!(Needle::new("", &Config::default()).is_none());
}

#[test]
fn prefix_hit_scores_full() {
	let m = needle("fire").match_keywords(&kw("Firefox")).expect("prefix hit");
	assert_eq!(m.kind, MatchKind::Prefix);
	assert_eq!(m.score, 1.0);
	assert_eq!(m.spans, vec![0..4]);
}

#[test]
fn fire_matches_file_manager_fuzzily_and_not_gimp() {
	let n = needle("fire");
	let firefox = n.match_keywords(&kw("Firefox")).expect("firefox");
	let files = n.match_keywords(&kw("File Manager")).expect("file manager");
	assert_eq!(files.kind, MatchKind::Fuzzy);
	assert!(firefox.score > files.score);
	assert!(n.match_keywords(&kw("GIMP")).is_none());
}

#[test]
fn contiguous_substring_beats_scattered_subsequence() {
	let n = needle("term");
	let contiguous = n.match_keyword("gnome terminal", 0).expect("substring");
	let scattered = n.match_keyword("the ear mill", 0).expect("subsequence");
	assert!(contiguous.score > scattered.score);
	assert_eq!(contiguous.spans, vec![6..10]);
}

#[test]
fn typo_lowers_score() {
	let n = needle("code");
	let exact = n.match_keyword("vs code", 0).expect("exact");
	let typo = n.match_keyword("vs cone editor", 0).expect("one typo");
	assert!(exact.score > typo.score);
}

#[test]
fn short_queries_get_no_typo_budget() {
	let n = needle("vim");
	assert_eq!(n.typo_budget(), 0);
	assert!(n.match_keyword("vi", 0).is_none());
	assert!(n.match_keyword("gvim", 0).is_some());
}

#[test]
fn later_keywords_weigh_less() {
	let n = needle("browser");
	let m = n
		.match_keywords(&["firefox".to_string(), "internet".to_string(), "browser".to_string()])
		.expect("keyword hit");
	assert_eq!(m.keyword, 2);
	assert_eq!(m.kind, MatchKind::Prefix);
	assert!((m.score - 0.8).abs() < 1e-9);
}

#[test]
fn fuzzy_never_reaches_prefix_on_same_keyword() {
	let n = needle("fox");
	let fuzzy = n.match_keyword("firefox", 0).expect("substring");
	let prefix = n.match_keyword("foxit reader", 0).expect("prefix");
	assert!(prefix.score > fuzzy.score);
}

#[test]
fn matching_is_deterministic() {
	let n = needle("fm");
	let a = n.match_keyword("file manager", 0);
	let b = n.match_keyword("file manager", 0);
	assert_eq!(a, b);
}

#[test]
fn keyword_weight_has_floor() {
	assert_eq!(keyword_weight(0), 1.0);
	assert!((keyword_weight(2) - 0.8).abs() < 1e-9);
	assert_eq!(keyword_weight(50), 0.6);
}
