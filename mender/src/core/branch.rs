//! Deterministic branch-name derivation from team and leader names.

/// Fixed marker appended to every derived branch name.
pub const BRANCH_SUFFIX: &str = "_AI_FIX";

/// Derive the push branch for a `(team, leader)` pair.
///
/// Total and pure: uppercase each part, strip characters that are neither
/// alphanumeric nor whitespace, collapse whitespace runs to a single
/// underscore, join the two parts with an underscore, and append
/// [`BRANCH_SUFFIX`]. The result never contains whitespace.
pub fn derive_branch(team: &str, leader: &str) -> String {
    format!("{}_{}{}", clean_token(team), clean_token(leader), BRANCH_SUFFIX)
}

fn clean_token(raw: &str) -> String {
    let upper: String = raw
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    upper.split_whitespace().collect::<Vec<_>>().join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_uppercased_tokens_with_suffix() {
        assert_eq!(derive_branch("rocket", "ada"), "ROCKET_ADA_AI_FIX");
    }

    #[test]
    fn collapses_whitespace_to_single_underscores() {
        assert_eq!(
            derive_branch("team  rocket", "ada   lovelace"),
            "TEAM_ROCKET_ADA_LOVELACE_AI_FIX"
        );
    }

    #[test]
    fn strips_non_alphanumerics() {
        assert_eq!(derive_branch("réd-panda!", "o'brien"), "RDPANDA_OBRIEN_AI_FIX");
    }

    #[test]
    fn never_contains_whitespace() {
        for (team, leader) in [("a b\tc", "d\ne"), ("  lots   of  gaps ", "x"), ("", "")] {
            let branch = derive_branch(team, leader);
            assert!(!branch.chars().any(char::is_whitespace), "{branch:?}");
            assert!(branch.ends_with(BRANCH_SUFFIX));
        }
    }
}
