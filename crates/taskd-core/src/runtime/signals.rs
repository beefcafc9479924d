//! Textual completion and continuation signals.
//!
//! The agent's natural-language output is the only channel for "am I
//! done?", so these heuristics are kept in one place as plain tables.
//! All matching is case-insensitive. The ordering rule in [`is_complete`]
//! distinguishes "done, then kept going" from "still planning".

/// Any of these alone marks the task complete.
const STRONG_COMPLETION: [&str; 3] = ["[task_complete]", "todos completed:", "all todos completed"];

/// These suggest completion, subject to the planning-phrase ordering rule.
const WEAK_COMPLETION: [&str; 8] = [
    "task complete",
    "task completed",
    "successfully completed",
    "all done",
    "finished successfully",
    "completed successfully",
    "nothing left to do",
    "all steps completed",
];

/// Phrases announcing more work; a weak completion claim followed by one of
/// these is not a completion.
const PLANNING_PHRASES: [&str; 5] = ["i will", "i'll", "let me", "next i", "then i"];

/// The agent is blocked on the user; treat the output as final.
const STOPPING_PHRASES: [&str; 6] = [
    "waiting for",
    "need more information",
    "please provide",
    "could you clarify",
    "what would you like",
    "should i proceed",
];

/// Signs of in-progress or announced work that warrant another iteration.
const WORK_PHRASES: [&str; 17] = [
    "i will",
    "i'll",
    "let me",
    "first,",
    "next,",
    "then,",
    "step 1",
    "step 2",
    "here's my plan",
    "i need to",
    "working on",
    "processing",
    "executing",
    "creating",
    "todo",
    "in_progress",
    "pending",
];

/// Does the output claim genuine completion?
///
/// Strong signals win outright. A weak signal counts unless a planning
/// phrase appears strictly after the last occurrence of "complete",
/// meaning the agent announced further work after claiming to be done.
pub fn is_complete(output: &str) -> bool {
    let lower = output.to_lowercase();

    if STRONG_COMPLETION.iter().any(|s| lower.contains(s)) {
        return true;
    }

    if !WEAK_COMPLETION.iter().any(|s| lower.contains(s)) {
        return false;
    }

    match lower.rfind("complete") {
        Some(last_complete) => !PLANNING_PHRASES.iter().any(|phrase| {
            lower
                .match_indices(phrase)
                .any(|(pos, _)| pos > last_complete)
        }),
        None => true,
    }
}

/// Should the executor send the continuation prompt?
///
/// Complete or blocked output ends the task. Otherwise tool activity or any
/// announced/in-progress work phrase means the agent has more to do.
pub fn needs_continuation(output: &str, tool_activity: bool) -> bool {
    if is_complete(output) {
        return false;
    }

    let lower = output.to_lowercase();
    if STOPPING_PHRASES.iter().any(|s| lower.contains(s)) {
        return false;
    }

    tool_activity || WORK_PHRASES.iter().any(|s| lower.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_signal_overrides_planning_order() {
        let output = "I will refactor next. [TASK_COMPLETE] Summary: done.";
        assert!(is_complete(output));
    }

    #[test]
    fn weak_signal_followed_by_planning_is_not_complete() {
        let output = "Task completed. Next I will add tests.";
        assert!(!is_complete(output));
        assert!(needs_continuation(output, false));
    }

    #[test]
    fn weak_signal_without_planning_completes() {
        assert!(is_complete("All steps completed, the refactor is merged."));
        assert!(is_complete("Everything finished successfully."));
    }

    #[test]
    fn planning_before_the_completion_claim_is_fine() {
        let output = "I will summarize: the migration ran and the task completed.";
        assert!(is_complete(output));
    }

    #[test]
    fn todo_summaries_are_strong_signals() {
        assert!(is_complete("Todos completed: 4/4"));
        assert!(is_complete("all todos completed"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(is_complete("TASK COMPLETED."));
        assert!(is_complete("[task_complete] summary"));
    }

    #[test]
    fn no_signal_is_not_complete() {
        assert!(!is_complete("Reading the codebase now."));
    }

    #[test]
    fn stopping_phrases_end_the_task() {
        assert!(!needs_continuation("Should I proceed with deleting the branch?", true));
        assert!(!needs_continuation("I need more information about the schema.", false));
    }

    #[test]
    fn tool_activity_continues_without_work_phrases() {
        assert!(needs_continuation("Ran the linter.", true));
        assert!(!needs_continuation("Ran the linter.", false));
    }

    #[test]
    fn work_phrases_continue_without_tool_activity() {
        assert!(needs_continuation("First, I need to map the modules.", false));
        assert!(needs_continuation("Working on the parser now.", false));
        assert!(needs_continuation("Step 1: audit the config loading.", false));
    }

    #[test]
    fn complete_output_never_continues() {
        assert!(!needs_continuation("[TASK_COMPLETE] all good", true));
    }
}
