//! # Codec Layer Tests: ReconstructionEngine
//!
//! Validates static subtraction, the leakage estimate, bounded candidate
//! enumeration, ranking, and the character profile and lexicon hints.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use typebleed_codec::{
    dynamic_set, leaked_bits, CharacterProfile, DetectedPattern, Lexicon, ReconstructionEngine,
    SlotGrammar, TemplateModel,
};
use typebleed_core::codepoint::codepoints;
use typebleed_core::registry::default_alphabet;
use typebleed_core::{Codepoint, Session, SessionStore};

/// A session that rendered `text` on the page, one capture per character.
fn session_showing(text: &str) -> Session {
    let store = SessionStore::new(Duration::from_secs(60));
    let id = store.create_at(0);
    for (i, c) in text.chars().enumerate() {
        store.record(&id, Codepoint::from(c), i as u64 + 1).unwrap();
    }
    store.snapshot_at(&id, 1_000).unwrap()
}

fn balance_template(pattern: &str) -> TemplateModel {
    let slot = SlotGrammar::new("amount", pattern, None, &default_alphabet(), None, None).unwrap();
    TemplateModel::new("balance", codepoints("Balance"), vec![slot])
}

/// The page read "Balance €128.12": dynamic set `{1, 2, 8, ., €}`.
/// Every candidate has the `€ddd.dd` shape and uses exactly 1, 2 and 8.
#[test]
fn test_euro_amount_scenario() {
    let t = Instant::now();

    let session = session_showing("Balance€128.12");
    let template = balance_template("€ddd.dd");
    let engine = ReconstructionEngine::new(1_000, 1_000_000);

    let result = engine.reconstruct(&session, &template, &default_alphabet());
    assert_eq!(result.dynamic_characters, codepoints("128.€"));
    assert_eq!(result.dynamic_text, ".128€");
    assert!(result.satisfies_template);
    assert!(result.unexplained.is_empty());
    assert!(!result.truncated, "150 candidates fit a cap of 1000");
    assert_eq!(result.candidates.len(), 150, "Surjections of 5 positions onto 3 digits");

    assert!(
        result.candidates.iter().any(|c| c.text == "€128.12"),
        "The true value must be among the candidates"
    );
    for candidate in &result.candidates {
        let chars: Vec<char> = candidate.text.chars().collect();
        assert_eq!(chars.len(), 7, "{:?}", candidate.text);
        assert_eq!(chars[0], '€');
        assert_eq!(chars[4], '.');
        let digits: BTreeSet<char> = chars
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 0 && *i != 4)
            .map(|(_, c)| *c)
            .collect();
        assert_eq!(digits, ['1', '2', '8'].into_iter().collect(), "{:?}", candidate.text);
        assert_eq!(candidate.slot, "amount");
    }

    let overhead = t.elapsed();
    println!("test_euro_amount_scenario: Testing Overhead = {:?}", overhead);
}

/// Enumeration stops at the cap and flags truncation.
#[test]
fn test_enumeration_is_capped() {
    let t = Instant::now();

    let session = session_showing("Balance€128.12");
    let template = balance_template("€ddd.dd");
    let engine = ReconstructionEngine::default();
    assert_eq!(engine.max_candidates(), 100);

    let result = engine.reconstruct(&session, &template, &default_alphabet());
    assert_eq!(result.candidates.len(), 100);
    assert!(result.truncated, "150 candidates exist, only 100 may be returned");

    let generator = engine.generator(&result.dynamic_characters, &template);
    let mut stream = generator.iter();
    assert_eq!(stream.by_ref().count(), 100);
    assert!(stream.truncated());
    assert_eq!(generator.iter().count(), 100, "The generator is restartable");

    let overhead = t.elapsed();
    println!("test_enumeration_is_capped: Testing Overhead = {:?}", overhead);
}

/// A tiny step budget ends the walk early and still reports truncation.
#[test]
fn test_step_budget_starves_enumeration() {
    let session = session_showing("Balance€128.12");
    let template = balance_template("€ddd.dd");
    let engine = ReconstructionEngine::new(1_000, 10);

    let (candidates, truncated) =
        engine.enumerate_candidates(&dynamic_set(&session, &template), &template);
    assert!(candidates.len() < 150);
    assert!(truncated, "Budget exhaustion is a truncation");
}

/// Candidates are ranked by score, ties broken by text.
#[test]
fn test_candidates_are_ranked() {
    let session = session_showing("Balance€128.12");
    let template = balance_template("€ddd.dd");
    let result = ReconstructionEngine::new(1_000, 1_000_000)
        .reconstruct(&session, &template, &default_alphabet());

    for pair in result.candidates.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(
            a.score > b.score || (a.score == b.score && a.text < b.text),
            "{:?} ranked before {:?}",
            a,
            b
        );
    }
    // Digit multiplicities differ between candidates, so exactness does too.
    let best = &result.candidates[0];
    let worst = &result.candidates[result.candidates.len() - 1];
    assert!(best.score > worst.score);
}

/// A text several slots can produce is reported once, under the tightest
/// slot, regardless of the slot order in the template.
#[test]
fn test_shared_candidates_keep_tightest_slot() {
    let alphabet = default_alphabet();
    let loose = SlotGrammar::new("loose", "d?ddd", None, &alphabet, None, None).unwrap();
    let tight = SlotGrammar::new("tight", "ddd", None, &alphabet, None, None).unwrap();
    let template = TemplateModel::new("t", BTreeSet::new(), vec![loose, tight]);
    let dynamic = codepoints("123");

    let (candidates, truncated) =
        ReconstructionEngine::new(1_000, 1_000_000).enumerate_candidates(&dynamic, &template);
    assert!(!truncated);
    let texts: BTreeSet<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts.len(), candidates.len(), "Candidates are deduplicated across slots");

    let exact = candidates.iter().find(|c| c.text == "123").unwrap();
    assert_eq!(exact.slot, "tight");
    assert!((exact.score - 1.0).abs() < 1e-9, "Got {}", exact.score);
    assert_eq!(candidates[0].text, "123", "Perfect candidates rank first, ties by text");

    for candidate in &candidates {
        let expected = if candidate.text.chars().count() == 3 { "tight" } else { "loose" };
        assert_eq!(candidate.slot, expected, "{:?}", candidate);
    }
}

/// A static character that also appears dynamically is indistinguishable
/// and is subtracted.
#[test]
fn test_static_overlap_is_subtracted() {
    let slot = SlotGrammar::new("amount", "€ddd.dd", None, &default_alphabet(), None, None).unwrap();
    let template = TemplateModel::new("t", codepoints("Balance 1"), vec![slot]);
    let session = session_showing("Balance 1€118.18");

    let dynamic = dynamic_set(&session, &template);
    assert_eq!(dynamic, codepoints("8.€"), "1 is static and cannot be recovered");

    let result = ReconstructionEngine::new(1_000, 1_000_000)
        .reconstruct(&session, &template, &default_alphabet());
    assert!(result.candidates.iter().all(|c| c.text.contains('8')));
}

/// Nothing dynamic on screen: no candidates, no leakage, still a result.
#[test]
fn test_empty_dynamic_set() {
    let template = balance_template("€ddd.dd");
    let session = session_showing("Balance");
    let result =
        ReconstructionEngine::default().reconstruct(&session, &template, &default_alphabet());

    assert!(result.dynamic_characters.is_empty());
    assert!(result.candidates.is_empty());
    assert!(!result.truncated);
    assert_eq!(result.leaked_bits, 0.0);
}

/// Characters no slot can host are reported, not dropped.
#[test]
fn test_unexplained_characters() {
    let template = balance_template("€ddd.dd");
    let session = session_showing("Balance€12.5Z");
    let result =
        ReconstructionEngine::default().reconstruct(&session, &template, &default_alphabet());

    assert_eq!(result.unexplained, codepoints("Z"));
    assert!(!result.satisfies_template);
    assert!(!result.candidates.is_empty(), "The explainable part is still enumerated");
    assert!(result.candidates.iter().all(|c| !c.text.contains('Z')));
}

#[test]
fn test_leaked_bits_values() {
    let t = Instant::now();

    assert_eq!(leaked_bits(0, 10), 0.0);
    assert_eq!(leaked_bits(10, 10), 0.0);
    assert_eq!(leaked_bits(11, 10), 0.0);
    assert!((leaked_bits(1, 8) - 3.0).abs() < 1e-9, "C(8,1) = 8 = 2^3");
    assert!((leaked_bits(2, 4) - 6f64.log2()).abs() < 1e-9);

    for n in 1..60 {
        for k in 0..n / 2 {
            assert!(leaked_bits(k + 1, n) > leaked_bits(k, n), "Not monotone in k at ({}, {})", k, n);
        }
        for k in 1..n {
            assert!(leaked_bits(k, n + 1) > leaked_bits(k, n), "Not monotone in n at ({}, {})", k, n);
        }
    }

    let overhead = t.elapsed();
    println!("test_leaked_bits_values: Testing Overhead = {:?}", overhead);
}

/// The result's leakage uses the alphabet minus static characters.
#[test]
fn test_result_leaked_bits_universe() {
    let template = balance_template("€ddd.dd");
    let session = session_showing("Balance€128.12");
    let alphabet = default_alphabet();
    let result = ReconstructionEngine::default().reconstruct(&session, &template, &alphabet);

    let universe = alphabet.len() - 6;
    assert!((result.leaked_bits - leaked_bits(5, universe)).abs() < 1e-9);
}

#[test]
fn test_character_profile() {
    let profile = CharacterProfile::of(&codepoints("€FI1 2.x"));
    assert_eq!(profile.total_unique, 8);
    assert_eq!(profile.uppercase, "FI");
    assert_eq!(profile.lowercase, "x");
    assert_eq!(profile.digits, "12");
    assert_eq!(profile.special, ".€", "Space is neither special nor alphanumeric");
    assert_eq!(
        profile.patterns,
        vec![
            DetectedPattern::CurrencyAmount,
            DetectedPattern::MixedCase,
            DetectedPattern::IbanPrefix
        ]
    );
    assert_eq!(profile.iban_countries, vec!["FI".to_string()]);

    let plain = CharacterProfile::of(&codepoints("abc@"));
    assert_eq!(plain.patterns, vec![DetectedPattern::EmailAddress]);
}

#[test]
fn test_lexicon_inference() {
    let mut categories = BTreeMap::new();
    categories.insert(
        "w".to_string(),
        vec!["at".to_string(), "cat".to_string(), "act".to_string(), "dog".to_string()],
    );
    categories.insert("empty".to_string(), vec!["zzz".to_string()]);
    let lexicon = Lexicon::new(categories);

    let words = lexicon.infer(&codepoints("TACx"));
    assert_eq!(words.len(), 1, "Categories without hits are omitted");
    assert_eq!(words["w"], vec!["act", "cat", "at"], "Longest first, then alphabetical");

    let builtin = Lexicon::default().infer(&codepoints("balnce"));
    assert!(builtin["banking"].contains(&"balance".to_string()));
}
