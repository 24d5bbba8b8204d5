use crate::grading::model::{AssignmentSnapshot, GradingJob};

/// One job per roster student; every job shares the snapshot's grade time.
pub(crate) fn build_jobs(assignment: &AssignmentSnapshot) -> Vec<GradingJob> {
    tracing::info!(
        assignment = %assignment.name,
        students = assignment.students.len(),
        "Building grading jobs"
    );

    assignment
        .students
        .iter()
        .map(|student| GradingJob {
            assignment: assignment.name.clone(),
            grade_time: assignment.grade_time,
            grader_url: assignment.grader_url.clone(),
            send_mark_email: assignment.send_mark_email_to_students,
            student: student.clone(),
        })
        .collect()
}
