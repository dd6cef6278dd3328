use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::{DbPool, DbResult},
    models::{
        DurationWindow, GroupField, InstancePairUsage, ModelPairUsage, NewUsageEvent, Page,
        PageParams, UsageEvent, UsageEventFilter, UsageFilter, UsageStats, UserInstancePair,
        UserModelPair, UserUsageStats, WindowGroupCounts, WindowSum,
    },
};

/// Model prefix applied to group counts when the caller gives none.
pub const DEFAULT_MODEL_PREFIX: &str = "gpt-4";

/// Windowed aggregation over the usage log.
///
/// Every query is anchored to a single `now` taken when the call starts, so
/// the windows of one request agree with each other.
#[derive(Clone)]
pub struct UsageService {
    db: Arc<DbPool>,
}

impl UsageService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Append one usage event.
    pub async fn record(&self, event: NewUsageEvent) -> DbResult<UsageEvent> {
        self.db.usage_events().insert(event).await
    }

    /// Paginated raw events, newest first.
    pub async fn list_events(
        &self,
        filter: &UsageEventFilter,
        params: PageParams,
    ) -> DbResult<Page<UsageEvent>> {
        self.db.usage_events().list(filter, params).await
    }

    /// Count and byte sums per user, one result per requested window.
    pub async fn sum_windows(
        &self,
        windows: &[DurationWindow],
        filter: UsageFilter,
    ) -> DbResult<Vec<WindowSum>> {
        self.sum_windows_at(Utc::now(), windows, filter).await
    }

    pub async fn sum_windows_at(
        &self,
        now: DateTime<Utc>,
        windows: &[DurationWindow],
        filter: UsageFilter,
    ) -> DbResult<Vec<WindowSum>> {
        let repo = self.db.usage_events();
        let mut out = Vec::with_capacity(windows.len());

        for &window in windows {
            let mut by_user = repo.sum_by_user(window.since(now), &filter).await?;

            if by_user.is_empty()
                && let Some(user_id) = filter.user_id
            {
                by_user.push(UserUsageStats::zero(user_id));
            }
            by_user.sort_by(|a, b| {
                b.count
                    .cmp(&a.count)
                    .then_with(|| a.user_id.cmp(&b.user_id))
            });

            let mut stats = UsageStats::default();
            for row in &by_user {
                stats.add(row.stats());
            }

            out.push(WindowSum {
                duration_window: window,
                stats,
                by_user,
            });
        }

        Ok(out)
    }

    /// Event counts for one window grouped by account or model, restricted to
    /// models starting with `model_prefix`.
    pub async fn count_grouped(
        &self,
        window: DurationWindow,
        instance_id: Option<Uuid>,
        group_by: GroupField,
        model_prefix: &str,
    ) -> DbResult<WindowGroupCounts> {
        self.count_grouped_at(Utc::now(), window, instance_id, group_by, model_prefix)
            .await
    }

    pub async fn count_grouped_at(
        &self,
        now: DateTime<Utc>,
        window: DurationWindow,
        instance_id: Option<Uuid>,
        group_by: GroupField,
        model_prefix: &str,
    ) -> DbResult<WindowGroupCounts> {
        let mut counts = self
            .db
            .usage_events()
            .count_grouped(window.since(now), instance_id, group_by, model_prefix)
            .await?;

        // Null keys sort before any string on equal counts.
        counts.sort_by(|a, b| match b.count.cmp(&a.count) {
            Ordering::Equal => a.key.cmp(&b.key),
            other => other,
        });

        Ok(WindowGroupCounts {
            duration_window: window,
            group_by,
            counts,
        })
    }

    /// Sums for each `(user, instance)` pair, in input order. Pairs without
    /// events come back as zeros.
    pub async fn sum_instance_pairs(
        &self,
        window: DurationWindow,
        pairs: &[UserInstancePair],
    ) -> DbResult<Vec<InstancePairUsage>> {
        self.sum_instance_pairs_at(Utc::now(), window, pairs).await
    }

    pub async fn sum_instance_pairs_at(
        &self,
        now: DateTime<Utc>,
        window: DurationWindow,
        pairs: &[UserInstancePair],
    ) -> DbResult<Vec<InstancePairUsage>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids = distinct_users(pairs.iter().map(|p| p.user_id));
        let rows = self
            .db
            .usage_events()
            .sum_by_user_instance(window.since(now), &user_ids)
            .await?;

        let lookup: HashMap<(Uuid, Uuid), UsageStats> = rows
            .into_iter()
            .map(|r| {
                (
                    (r.user_id, r.instance_id),
                    UsageStats {
                        count: r.count,
                        sum_utf8_length: r.sum_utf8_length,
                    },
                )
            })
            .collect();

        Ok(pairs
            .iter()
            .map(|pair| {
                let stats = lookup
                    .get(&(pair.user_id, pair.instance_id))
                    .copied()
                    .unwrap_or_default();
                InstancePairUsage {
                    user_id: pair.user_id,
                    instance_id: pair.instance_id,
                    count: stats.count,
                    sum_utf8_length: stats.sum_utf8_length,
                }
            })
            .collect())
    }

    /// Sums for each `(user, model)` pair, in input order. Model names match
    /// exactly.
    pub async fn sum_model_pairs(
        &self,
        window: DurationWindow,
        pairs: &[UserModelPair],
    ) -> DbResult<Vec<ModelPairUsage>> {
        self.sum_model_pairs_at(Utc::now(), window, pairs).await
    }

    pub async fn sum_model_pairs_at(
        &self,
        now: DateTime<Utc>,
        window: DurationWindow,
        pairs: &[UserModelPair],
    ) -> DbResult<Vec<ModelPairUsage>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids = distinct_users(pairs.iter().map(|p| p.user_id));
        let rows = self
            .db
            .usage_events()
            .sum_by_user_model(window.since(now), &user_ids)
            .await?;

        let lookup: HashMap<(Uuid, String), UsageStats> = rows
            .into_iter()
            .map(|r| {
                (
                    (r.user_id, r.model),
                    UsageStats {
                        count: r.count,
                        sum_utf8_length: r.sum_utf8_length,
                    },
                )
            })
            .collect();

        Ok(pairs
            .iter()
            .map(|pair| {
                let stats = lookup
                    .get(&(pair.user_id, pair.model.clone()))
                    .copied()
                    .unwrap_or_default();
                ModelPairUsage {
                    user_id: pair.user_id,
                    model: pair.model.clone(),
                    count: stats.count,
                    sum_utf8_length: stats.sum_utf8_length,
                }
            })
            .collect())
    }
}

fn distinct_users(ids: impl Iterator<Item = Uuid>) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::new();
    ids.filter(|id| seen.insert(*id)).collect()
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::{
        db::tests::harness::create_sqlite_db,
        models::{ServiceType, UsageDetails},
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    async fn service() -> UsageService {
        UsageService::new(Arc::new(create_sqlite_db().await))
    }

    async fn insert(
        svc: &UsageService,
        user_id: Uuid,
        instance_id: Uuid,
        at: DateTime<Utc>,
        model: &str,
        byte_length: i64,
    ) {
        svc.record(NewUsageEvent {
            user_id,
            instance_id,
            service_type: ServiceType::ChatgptShared,
            timestamp: at,
            model: model.to_string(),
            byte_length,
            text: None,
            details: UsageDetails {
                service_type: ServiceType::ChatgptShared,
                model: model.to_string(),
                chatgpt_account_id: None,
                conversation_id: None,
            },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_windows_in_request_order() {
        let svc = service().await;
        let user = Uuid::new_v4();
        let instance = Uuid::new_v4();
        for hours in [4, 5, 10] {
            insert(&svc, user, instance, now() - Duration::hours(hours), "gpt-4o", 10).await;
        }

        let sums = svc
            .sum_windows_at(
                now(),
                &[DurationWindow::ThreeHours, DurationWindow::TwentyFourHours],
                UsageFilter {
                    user_id: Some(user),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(sums.len(), 2);
        assert_eq!(sums[0].duration_window, DurationWindow::ThreeHours);
        assert_eq!(sums[0].stats.count, 0);
        assert_eq!(sums[0].by_user, vec![UserUsageStats::zero(user)]);
        assert_eq!(sums[1].duration_window, DurationWindow::TwentyFourHours);
        assert_eq!(sums[1].stats.count, 3);
        assert_eq!(sums[1].stats.sum_utf8_length, 30);
    }

    #[tokio::test]
    async fn test_per_user_sums_add_up_to_total() {
        let svc = service().await;
        let instance = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        insert(&svc, a, instance, now() - Duration::minutes(5), "gpt-4o", 7).await;
        insert(&svc, a, instance, now() - Duration::minutes(6), "gpt-4o", 3).await;
        insert(&svc, b, instance, now() - Duration::minutes(7), "o1", 5).await;

        let sums = svc
            .sum_windows_at(now(), &[DurationWindow::ThreeHours], UsageFilter::default())
            .await
            .unwrap();

        let window = &sums[0];
        assert_eq!(window.by_user.len(), 2);
        assert_eq!(window.by_user[0].user_id, a);
        let total: i64 = window.by_user.iter().map(|u| u.sum_utf8_length).sum();
        assert_eq!(total, window.stats.sum_utf8_length);
        assert_eq!(window.stats.count, 3);
    }

    #[tokio::test]
    async fn test_empty_global_window_has_no_users() {
        let svc = service().await;
        let sums = svc
            .sum_windows_at(now(), &[DurationWindow::SevenDays], UsageFilter::default())
            .await
            .unwrap();
        assert!(sums[0].by_user.is_empty());
        assert_eq!(sums[0].stats, UsageStats::default());
    }

    #[tokio::test]
    async fn test_instance_pairs_keep_order_and_fill_zeros() {
        let svc = service().await;
        let user = Uuid::new_v4();
        let (i1, i2) = (Uuid::new_v4(), Uuid::new_v4());
        insert(&svc, user, i2, now() - Duration::minutes(1), "gpt-4o", 4).await;

        let pairs = vec![
            UserInstancePair {
                user_id: user,
                instance_id: i1,
            },
            UserInstancePair {
                user_id: user,
                instance_id: i2,
            },
            UserInstancePair {
                user_id: user,
                instance_id: i2,
            },
        ];
        let result = svc
            .sum_instance_pairs_at(now(), DurationWindow::ThreeHours, &pairs)
            .await
            .unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result[0].instance_id, i1);
        assert_eq!(result[0].count, 0);
        assert_eq!(result[1].count, 1);
        assert_eq!(result[1].sum_utf8_length, 4);
        assert_eq!(result[2], result[1]);
    }

    #[tokio::test]
    async fn test_model_pairs_match_exact_model() {
        let svc = service().await;
        let user = Uuid::new_v4();
        let instance = Uuid::new_v4();
        insert(&svc, user, instance, now() - Duration::minutes(1), "gpt-4o-mini", 2).await;

        let pairs = vec![
            UserModelPair {
                user_id: user,
                model: "gpt-4o".into(),
            },
            UserModelPair {
                user_id: user,
                model: "gpt-4o-mini".into(),
            },
        ];
        let result = svc
            .sum_model_pairs_at(now(), DurationWindow::ThreeHours, &pairs)
            .await
            .unwrap();

        assert_eq!(result[0].count, 0);
        assert_eq!(result[1].count, 1);
    }

    #[tokio::test]
    async fn test_group_counts_sorted_by_count() {
        let svc = service().await;
        let user = Uuid::new_v4();
        let instance = Uuid::new_v4();
        insert(&svc, user, instance, now() - Duration::minutes(1), "gpt-4o", 0).await;
        insert(&svc, user, instance, now() - Duration::minutes(2), "gpt-4", 0).await;
        insert(&svc, user, instance, now() - Duration::minutes(3), "gpt-4", 0).await;
        insert(&svc, user, instance, now() - Duration::minutes(4), "o1", 0).await;

        let grouped = svc
            .count_grouped_at(
                now(),
                DurationWindow::ThreeHours,
                None,
                GroupField::Model,
                DEFAULT_MODEL_PREFIX,
            )
            .await
            .unwrap();

        let keys: Vec<_> = grouped
            .counts
            .iter()
            .map(|c| (c.key.as_deref(), c.count))
            .collect();
        assert_eq!(keys, vec![(Some("gpt-4"), 2), (Some("gpt-4o"), 1)]);
    }
}
