//! Whimsical step labels for the advisor-analysis phase.

use rand::seq::SliceRandom;

/// The verbs clients expect in `current_step`. Copy depends on these exact
/// strings.
pub const SUMMONING_VERBS: [&str; 6] = [
    "Conjuring",
    "Summoning",
    "Beckoning",
    "Invoking",
    "Calling forth",
    "Manifesting",
];

/// `<verb> <Advisor Display Name>`, verb chosen uniformly at random per
/// advisor.
pub fn step_label(display_name: &str) -> String {
    let verb = SUMMONING_VERBS
        .choose(&mut rand::thread_rng())
        .expect("verb list is non-empty");
    format!("{} {}", verb, display_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_verb_plus_name() {
        for _ in 0..32 {
            let label = step_label("Ansel Adams");
            assert!(label.ends_with(" Ansel Adams"));
            let verb = label.trim_end_matches(" Ansel Adams");
            assert!(SUMMONING_VERBS.contains(&verb), "unexpected verb: {verb}");
        }
    }

    #[test]
    fn all_verbs_eventually_appear() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..512 {
            let label = step_label("X");
            seen.insert(label.trim_end_matches(" X").to_string());
        }
        assert_eq!(seen.len(), SUMMONING_VERBS.len());
    }
}
