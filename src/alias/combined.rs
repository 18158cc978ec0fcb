//! Combined-mode merge law: how several backends' verdicts on the same
//! query collapse into one `AliasResult`.

use super::AliasResult;

/// Merges the per-backend verdicts for one query. `MustAlias` and `NoAlias`
/// are mutually exclusive claims about the same pair of values; seeing both
/// means the backends disagree, which this treats as a contradiction and
/// falls back to the conservative answer rather than trusting either.
pub fn merge_law(results: &[AliasResult]) -> AliasResult {
    let has_no = results.contains(&AliasResult::NoAlias);
    let has_must = results.contains(&AliasResult::MustAlias);
    let has_partial = results.contains(&AliasResult::PartialAlias);

    if has_no && has_must {
        AliasResult::MayAlias
    } else if has_no {
        AliasResult::NoAlias
    } else if has_must {
        AliasResult::MustAlias
    } else if has_partial {
        AliasResult::PartialAlias
    } else {
        AliasResult::MayAlias
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_alias_wins_without_must() {
        let r = merge_law(&[AliasResult::NoAlias, AliasResult::MayAlias]);
        assert_eq!(r, AliasResult::NoAlias);
    }

    #[test]
    fn must_alias_wins_without_no() {
        let r = merge_law(&[AliasResult::MustAlias, AliasResult::MayAlias]);
        assert_eq!(r, AliasResult::MustAlias);
    }

    #[test]
    fn contradiction_falls_back_to_may_alias() {
        let r = merge_law(&[AliasResult::NoAlias, AliasResult::MustAlias]);
        assert_eq!(r, AliasResult::MayAlias);
    }

    #[test]
    fn partial_alias_when_no_stronger_verdict() {
        let r = merge_law(&[AliasResult::PartialAlias, AliasResult::MayAlias]);
        assert_eq!(r, AliasResult::PartialAlias);
    }

    #[test]
    fn empty_merge_is_may_alias() {
        assert_eq!(merge_law(&[]), AliasResult::MayAlias);
    }
}
