use std::hint::black_box;

use beacon_matcher::{Config, Needle, match_list, normalize};
use criterion::{Criterion, criterion_group, criterion_main};

fn corpus(n: usize) -> Vec<Vec<String>> {
	const WORDS: [&str; 8] = ["firefox", "files", "terminal", "settings", "calculator", "editor", "music", "mail"];
	(0..n)
		.map(|i| {
			let label = format!("{} {} {i}", WORDS[i % WORDS.len()], WORDS[(i / 8) % WORDS.len()]);
			vec![normalize(&label), normalize(WORDS[(i * 3) % WORDS.len()])]
		})
		.collect()
}

fn bench_match_list(c: &mut Criterion) {
	let config = Config::default();
	for size in [500usize, 5000] {
		let items = corpus(size);
		for query in ["fire", "tmnl", "set"] {
			let needle = Needle::new(query, &config).expect("needle");
			c.bench_function(&format!("match_list/{size}/{query}"), |b| {
				b.iter(|| match_list(black_box(&needle), black_box(&items), |k| k.as_slice()))
			});
		}
	}
}

criterion_group!(benches, bench_match_list);
criterion_main!(benches);
