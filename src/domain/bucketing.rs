use crate::domain::models::Task;
use chrono::NaiveDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Due,
    Carried,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskBuckets {
    pub due: Vec<Task>,
    pub carried: Vec<Task>,
    pub done: Vec<Task>,
    /// Ids of overdue tasks whose carry-over flag was set by this pass.
    pub newly_carried: Vec<String>,
}

/// Bucket a single task without touching it. Future-dated incomplete tasks
/// land in the backlog alongside carried-over ones.
pub fn classify(task: &Task, today: NaiveDate) -> Bucket {
    if task.completed {
        return Bucket::Done;
    }
    if task.carry_over {
        return Bucket::Carried;
    }
    match task.scheduled_date() {
        Some(date) if date != today => Bucket::Carried,
        _ => Bucket::Due,
    }
}

pub fn is_overdue(task: &Task, today: NaiveDate) -> bool {
    !task.completed
        && !task.carry_over
        && task.scheduled_date().is_some_and(|date| date < today)
}

/// Partition `tasks` relative to `today`, flipping overdue incomplete tasks
/// to carry-over. `due` is ordered by time of day; ties keep input order.
pub fn bucket(tasks: Vec<Task>, today: NaiveDate) -> TaskBuckets {
    let mut buckets = TaskBuckets::default();

    for mut task in tasks {
        if is_overdue(&task, today) {
            task.carry_over = true;
            buckets.newly_carried.push(task.id.clone());
        }
        match classify(&task, today) {
            Bucket::Done => buckets.done.push(task),
            Bucket::Carried => buckets.carried.push(task),
            Bucket::Due => buckets.due.push(task),
        }
    }

    buckets.due.sort_by(|left, right| left.due.cmp(&right.due));
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;

    fn day(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn task(id: &str, date: Option<&str>, due: Option<&str>) -> Task {
        Task {
            id: id.to_string(),
            text: format!("task {id}"),
            description: None,
            due: due.map(ToOwned::to_owned),
            date: date.map(ToOwned::to_owned),
            color: None,
            completed: false,
            carry_over: false,
            created_at: epoch(),
        }
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(0, 0).expect("epoch")
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|task| task.id.as_str()).collect()
    }

    #[test]
    fn overdue_task_is_carried_and_flagged() {
        let buckets = bucket(
            vec![task("rent", Some("2024-01-01"), None)],
            day("2024-01-05"),
        );

        assert!(buckets.due.is_empty());
        assert_eq!(ids(&buckets.carried), vec!["rent"]);
        assert!(buckets.carried[0].carry_over);
        assert_eq!(buckets.newly_carried, vec!["rent".to_string()]);
    }

    #[test]
    fn missing_or_malformed_date_counts_as_today() {
        let buckets = bucket(
            vec![
                task("undated", None, None),
                task("garbled", Some("soon"), None),
                task("today", Some("2024-01-05"), None),
            ],
            day("2024-01-05"),
        );

        assert_eq!(ids(&buckets.due), vec!["undated", "garbled", "today"]);
        assert!(buckets.newly_carried.is_empty());
    }

    #[test]
    fn future_task_goes_to_backlog_without_flag() {
        let buckets = bucket(
            vec![task("later", Some("2024-02-01"), None)],
            day("2024-01-05"),
        );

        assert_eq!(ids(&buckets.carried), vec!["later"]);
        assert!(!buckets.carried[0].carry_over);
        assert!(buckets.newly_carried.is_empty());
    }

    #[test]
    fn completed_wins_over_carry_over() {
        let mut finished = task("finished", Some("2023-12-01"), None);
        finished.completed = true;
        finished.carry_over = true;

        let buckets = bucket(vec![finished], day("2024-01-05"));
        assert_eq!(ids(&buckets.done), vec!["finished"]);
        assert!(buckets.newly_carried.is_empty());
    }

    #[test]
    fn due_bucket_sorts_by_time_and_keeps_ties_stable() {
        let buckets = bucket(
            vec![
                task("late", None, Some("17:00")),
                task("first-nine", None, Some("09:00")),
                task("untimed", None, None),
                task("second-nine", None, Some("09:00")),
            ],
            day("2024-01-05"),
        );

        assert_eq!(
            ids(&buckets.due),
            vec!["untimed", "first-nine", "second-nine", "late"]
        );
    }

    fn arb_task() -> impl Strategy<Value = Task> {
        (
            any::<bool>(),
            any::<bool>(),
            proptest::option::of(-10i64..10i64),
            proptest::option::of((0u8..24u8, 0u8..60u8)),
        )
            .prop_map(|(completed, carry_over, offset, due)| {
                let base = day("2024-01-05");
                Task {
                    id: String::new(),
                    text: "generated".to_string(),
                    description: None,
                    due: due.map(|(hour, minute)| format!("{hour:02}:{minute:02}")),
                    date: offset.map(|days| (base + Duration::days(days)).to_string()),
                    color: None,
                    completed,
                    carry_over,
                    created_at: epoch(),
                }
            })
    }

    fn arb_tasks() -> impl Strategy<Value = Vec<Task>> {
        proptest::collection::vec(arb_task(), 0..40).prop_map(|mut tasks| {
            for (index, task) in tasks.iter_mut().enumerate() {
                task.id = format!("t{index}");
            }
            tasks
        })
    }

    proptest! {
        #[test]
        fn every_task_lands_in_exactly_one_bucket(tasks in arb_tasks()) {
            let total = tasks.len();
            let buckets = bucket(tasks, day("2024-01-05"));
            prop_assert_eq!(buckets.due.len() + buckets.carried.len() + buckets.done.len(), total);
        }

        #[test]
        fn completed_tasks_always_done(tasks in arb_tasks()) {
            let completed = tasks.iter().filter(|task| task.completed).count();
            let buckets = bucket(tasks, day("2024-01-05"));
            prop_assert_eq!(buckets.done.len(), completed);
            prop_assert!(buckets.done.iter().all(|task| task.completed));
            prop_assert!(buckets.due.iter().chain(&buckets.carried).all(|task| !task.completed));
        }

        #[test]
        fn overdue_tasks_are_flagged_once(tasks in arb_tasks()) {
            let today = day("2024-01-05");
            let overdue = tasks.iter().filter(|task| is_overdue(task, today)).count();
            let first = bucket(tasks, today);
            prop_assert_eq!(first.newly_carried.len(), overdue);
            for id in &first.newly_carried {
                let carried = first.carried.iter().find(|task| &task.id == id);
                prop_assert!(carried.is_some_and(|task| task.carry_over));
            }

            let replay = first
                .due
                .iter()
                .chain(&first.carried)
                .chain(&first.done)
                .cloned()
                .collect::<Vec<_>>();
            let second = bucket(replay, today);
            prop_assert!(second.newly_carried.is_empty());
            prop_assert_eq!(second.due.len(), first.due.len());
            prop_assert_eq!(second.carried.len(), first.carried.len());
            prop_assert_eq!(second.done.len(), first.done.len());
        }

        #[test]
        fn due_bucket_is_sorted_for_any_permutation(tasks in arb_tasks()) {
            let buckets = bucket(tasks, day("2024-01-05"));
            prop_assert!(buckets.due.windows(2).all(|pair| pair[0].due <= pair[1].due));
        }
    }
}
