// Condition Evaluator
// Pure verdicts: same condition and context always yield the same answer

use crate::execution::context::ExecutionContext;
use crate::spec::{Applicability, Condition};

/// Whether a job instance runs in this pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Run,
    Skip,
    /// Manual job without an approval signal: it stays Pending indefinitely
    /// and is evaluated outside the automatic stage-completion gate.
    Hold,
}

/// Evaluate a job's trigger condition against the run context.
///
/// Manual applicability is checked first: an unapproved manual job holds
/// regardless of its branch predicates. An approved manual job is then
/// subject to the same predicates as an automatic one. A condition with no
/// predicates and automatic applicability defaults to Run.
pub fn evaluate(job_name: &str, condition: &Condition, ctx: &ExecutionContext) -> Verdict {
    if condition.when == Applicability::Manual && !ctx.is_approved(job_name) {
        return Verdict::Hold;
    }

    if !condition.triggers.is_empty() && !condition.triggers.contains(&ctx.trigger) {
        return Verdict::Skip;
    }

    if !condition.only.is_empty()
        && !condition.only.iter().any(|p| ref_matches(p, &ctx.git_ref))
    {
        return Verdict::Skip;
    }

    if condition.except.iter().any(|p| ref_matches(p, &ctx.git_ref)) {
        return Verdict::Skip;
    }

    Verdict::Run
}

/// Match a ref against a pattern: exact name, or a glob with `*` matching
/// any (possibly empty) substring.
pub fn ref_matches(pattern: &str, git_ref: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == git_ref;
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    let mut remainder = git_ref;

    // First segment must anchor at the start, last at the end.
    if let Some(first) = segments.first() {
        if !remainder.starts_with(first) {
            return false;
        }
        remainder = &remainder[first.len()..];
    }

    for (i, segment) in segments.iter().enumerate().skip(1) {
        if segment.is_empty() {
            continue;
        }
        if i == segments.len() - 1 {
            return remainder.ends_with(segment);
        }
        match remainder.find(segment) {
            Some(pos) => remainder = &remainder[pos + segment.len()..],
            None => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::TriggerKind;

    fn ctx(git_ref: &str) -> ExecutionContext {
        ExecutionContext::new(git_ref, TriggerKind::Push)
    }

    fn only(refs: &[&str]) -> Condition {
        Condition {
            only: refs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_only_master_skips_develop() {
        assert_eq!(
            evaluate("pages", &only(&["master"]), &ctx("develop")),
            Verdict::Skip
        );
        assert_eq!(
            evaluate("pages", &only(&["master"]), &ctx("master")),
            Verdict::Run
        );
    }

    #[test]
    fn test_default_condition_runs() {
        assert_eq!(
            evaluate("unit", &Condition::default(), &ctx("anything")),
            Verdict::Run
        );
    }

    #[test]
    fn test_glob_patterns() {
        assert!(ref_matches("release/*", "release/1.2"));
        assert!(!ref_matches("release/*", "hotfix/1.2"));
        assert!(ref_matches("*-stable", "v2-stable"));
        assert!(ref_matches("*", "anything"));
        assert!(!ref_matches("master", "masterful"));
    }

    #[test]
    fn test_except_overrides() {
        let condition = Condition {
            except: vec!["wip/*".to_string()],
            ..Default::default()
        };
        assert_eq!(evaluate("unit", &condition, &ctx("wip/x")), Verdict::Skip);
        assert_eq!(evaluate("unit", &condition, &ctx("master")), Verdict::Run);
    }

    #[test]
    fn test_trigger_filter() {
        let condition = Condition {
            triggers: vec![TriggerKind::Schedule],
            ..Default::default()
        };
        assert_eq!(evaluate("nightly", &condition, &ctx("master")), Verdict::Skip);

        let scheduled = ExecutionContext::new("master", TriggerKind::Schedule);
        assert_eq!(evaluate("nightly", &condition, &scheduled), Verdict::Run);
    }

    #[test]
    fn test_manual_holds_without_approval() {
        let condition = Condition {
            when: Applicability::Manual,
            only: vec!["develop".to_string()],
            ..Default::default()
        };
        // Unapproved manual holds even when branch predicates would skip.
        assert_eq!(evaluate("deploy", &condition, &ctx("master")), Verdict::Hold);

        // Approved manual falls through to the predicates.
        let approved = ctx("master").approve("deploy");
        assert_eq!(evaluate("deploy", &condition, &approved), Verdict::Skip);
        let approved_develop = ctx("develop").approve("deploy");
        assert_eq!(
            evaluate("deploy", &condition, &approved_develop),
            Verdict::Run
        );
    }

    #[test]
    fn test_evaluation_is_pure() {
        let condition = only(&["master"]);
        let context = ctx("master");
        for _ in 0..3 {
            assert_eq!(evaluate("job", &condition, &context), Verdict::Run);
        }
    }
}
