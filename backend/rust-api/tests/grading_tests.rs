use coursepilot_api::error::CoreError;
use coursepilot_api::models::test::{AnswerSubmission, QuestionRecord, UNSURE_ANSWER};
use coursepilot_api::services::grading_service::score_submission;

fn question(id: &str, module_index: u32, correct: u32) -> QuestionRecord {
    QuestionRecord {
        id: id.to_string(),
        course_id: "rust-101".to_string(),
        module_index,
        question_text: format!("Question {}", id),
        options: vec![
            "Option A".to_string(),
            "Option B".to_string(),
            "Option C".to_string(),
            "Option D".to_string(),
        ],
        correct_answer_index: correct,
    }
}

fn answer(question_id: &str, selected: i32) -> AnswerSubmission {
    AnswerSubmission {
        question_id: question_id.to_string(),
        selected_option_index: selected,
    }
}

/// Course-wide scenario: two modules graded independently, one passes.
#[test]
fn course_test_grades_each_module_independently() {
    let questions = vec![
        question("m0-q1", 0, 0),
        question("m0-q2", 0, 1),
        question("m1-q1", 1, 2),
        question("m1-q2", 1, 3),
    ];
    let answers = vec![
        answer("m0-q1", 0),
        answer("m0-q2", 1),
        answer("m1-q1", 2),
        answer("m1-q2", 0),
    ];

    let scored = score_submission(&questions, &answers).unwrap();

    assert_eq!(scored.passed_modules, vec![0]);
    assert_eq!(scored.module_results[&0].correct, 2);
    assert_eq!(scored.module_results[&0].total, 2);
    assert_eq!(scored.module_results[&1].correct, 1);
    assert_eq!(scored.module_results[&1].total, 2);
    assert_eq!(scored.answers.len(), 4);
}

/// An "unsure" answer can never pass its module, even when the learner
/// would have been right.
#[test]
fn unsure_sentinel_forces_a_wrong_answer() {
    let questions = vec![question("q1", 0, 0), question("q2", 0, 1)];
    let answers = vec![answer("q1", 0), answer("q2", UNSURE_ANSWER)];

    let scored = score_submission(&questions, &answers).unwrap();

    assert!(scored.passed_modules.is_empty());
    assert_eq!(scored.module_results[&0].correct, 1);
    assert!(!scored.answers[1].is_correct);
}

/// Answers pointing at questions from another course reject the whole
/// submission instead of being skipped.
#[test]
fn foreign_question_ids_reject_the_submission() {
    let questions = vec![question("q1", 0, 0)];
    let answers = vec![answer("q1", 0), answer("other-course-q", 1)];

    match score_submission(&questions, &answers) {
        Err(CoreError::Validation(message)) => {
            assert!(message.contains("other-course-q"));
        }
        other => panic!("expected validation error, got {:?}", other.is_ok()),
    }
}

/// A submission covering only part of the question scope is rejected
/// outright: nothing is graded, so no attempt or mastery can be derived
/// from it.
#[test]
fn incomplete_submission_is_rejected_not_graded() {
    let questions = vec![question("m0-q1", 0, 0), question("m1-q1", 1, 2)];
    let answers = vec![answer("m0-q1", 0)];

    match score_submission(&questions, &answers) {
        Err(CoreError::Validation(message)) => {
            assert!(message.contains("m1-q1"));
        }
        other => panic!("expected validation error, got {:?}", other.is_ok()),
    }
}

/// Same submission, same verdict. Grading has no hidden state.
#[test]
fn grading_is_reproducible_across_runs() {
    let questions: Vec<QuestionRecord> = (0..6)
        .map(|i| question(&format!("q{}", i), i / 2, (i % 4) as u32))
        .collect();
    let answers: Vec<AnswerSubmission> = (0..6)
        .map(|i| answer(&format!("q{}", i), (i % 4) as i32))
        .collect();

    let first = score_submission(&questions, &answers).unwrap();
    for _ in 0..10 {
        let again = score_submission(&questions, &answers).unwrap();
        assert_eq!(again.passed_modules, first.passed_modules);
        assert_eq!(again.module_results, first.module_results);
    }
}

/// Out-of-range indexes (above the option count) grade as wrong, not as a
/// protocol error.
#[test]
fn out_of_range_selection_is_just_wrong() {
    let questions = vec![question("q1", 0, 2)];
    let answers = vec![answer("q1", 7)];

    let scored = score_submission(&questions, &answers).unwrap();
    assert!(!scored.answers[0].is_correct);
    assert!(scored.passed_modules.is_empty());
}
