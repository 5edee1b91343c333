//! Pure aggregation and ranking over a competition's submission set.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::{CompetitionStats, RankedSubmission, Submission};

pub fn aggregate_submissions(submissions: &[Submission], at: DateTime<Utc>) -> CompetitionStats {
    let total_submissions = submissions.len() as u64;
    let total_views = submissions
        .iter()
        .fold(0u64, |acc, s| acc.saturating_add(s.current_view_count));
    let unique_creators = submissions
        .iter()
        .map(|s| s.creator_id.as_str())
        .collect::<HashSet<_>>()
        .len() as u64;
    let average_views = if total_submissions > 0 {
        total_views as f64 / total_submissions as f64
    } else {
        0.0
    };

    CompetitionStats {
        total_submissions,
        total_views,
        unique_creators,
        average_views,
        last_updated: at,
    }
}

/// Full ranking: view count descending, submission id ascending on ties.
/// Ranks are 1-based positions in that order.
pub fn rank_submissions(submissions: &[Submission]) -> Vec<RankedSubmission> {
    let mut ordered: Vec<&Submission> = submissions.iter().collect();
    ordered.sort_by(|a, b| {
        b.current_view_count
            .cmp(&a.current_view_count)
            .then_with(|| a.id.cmp(&b.id))
    });

    ordered
        .into_iter()
        .enumerate()
        .map(|(idx, s)| RankedSubmission {
            submission_id: s.id.clone(),
            rank: (idx + 1) as u32,
            view_count: s.current_view_count,
            platform: s.platform,
        })
        .collect()
}

pub fn top_submissions(ranked: &[RankedSubmission], limit: usize) -> Vec<RankedSubmission> {
    ranked.iter().take(limit).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Platform, MAX_TOP_SUBMISSIONS};
    use chrono::TimeZone;

    fn submission(id: &str, creator: &str, views: u64) -> Submission {
        Submission {
            id: id.to_string(),
            competition_id: "comp".to_string(),
            creator_id: creator.to_string(),
            platform: Platform::Youtube,
            external_video_id: Some(format!("vid-{id}")),
            current_view_count: views,
            last_updated_at: None,
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 18, 14, 0, 0).single().unwrap()
    }

    #[test]
    fn empty_set_has_zero_average() {
        let stats = aggregate_submissions(&[], at());
        assert_eq!(stats.total_submissions, 0);
        assert_eq!(stats.total_views, 0);
        assert_eq!(stats.unique_creators, 0);
        assert_eq!(stats.average_views, 0.0);
    }

    #[test]
    fn three_submissions_two_creators() {
        let subs = vec![
            submission("a", "alice", 10),
            submission("b", "bob", 20),
            submission("c", "alice", 30),
        ];
        let stats = aggregate_submissions(&subs, at());
        assert_eq!(stats.total_submissions, 3);
        assert_eq!(stats.total_views, 60);
        assert_eq!(stats.unique_creators, 2);
        assert_eq!(stats.average_views, 20.0);
        assert_eq!(stats.last_updated, at());
    }

    #[test]
    fn ranking_orders_by_views_then_id() {
        let subs = vec![
            submission("m", "u1", 5),
            submission("z", "u2", 50),
            submission("b", "u3", 5),
            submission("a", "u4", 50),
        ];
        let ranked = rank_submissions(&subs);
        let order: Vec<_> = ranked.iter().map(|r| r.submission_id.as_str()).collect();
        assert_eq!(order, vec!["a", "z", "b", "m"]);
        assert_eq!(ranked.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        let mut reversed = subs.clone();
        reversed.reverse();
        assert_eq!(rank_submissions(&reversed), ranked);
    }

    #[test]
    fn top_keeps_first_ten() {
        let subs: Vec<_> = (0..25)
            .map(|i| submission(&format!("s{i:02}"), "u", i as u64))
            .collect();
        let ranked = rank_submissions(&subs);
        let top = top_submissions(&ranked, MAX_TOP_SUBMISSIONS);
        assert_eq!(top.len(), 10);
        assert_eq!(top[0].submission_id, "s24");
        assert_eq!(top[9].rank, 10);
    }
}
