//! Reshaping of flat aggregate rows into dense chart datasets.
//!
//! A matrix has one row per active user and one column per instance or
//! model. The cross product is answered by a single batched query, then
//! `values[row][col]` is filled by position.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::UsageService;
use crate::{
    db::{DbPool, DbResult},
    models::{
        DurationWindow, UsageFilter, UsageStats, User, UserInstancePair, UserModelPair,
        sort_users_by_comment,
    },
};

/// Models charted when the caller names none.
pub const DEFAULT_CHART_MODELS: [&str; 5] = ["gpt-4o", "gpt-4o-mini", "gpt-4", "o1", "o1-mini"];

/// One row of a chart: a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct ChartRow {
    pub user_id: Uuid,
    pub name: String,
    pub comment: Option<String>,
}

impl From<&User> for ChartRow {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            name: user.name.clone(),
            comment: user.comment.clone(),
        }
    }
}

/// One stacked series: a column's counts down every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct ChartSeries {
    /// Instance id or model name
    pub key: String,
    pub label: String,
    pub data: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UsageMatrix {
    pub duration_window: DurationWindow,
    pub rows: Vec<ChartRow>,
    pub series: Vec<ChartSeries>,
    /// `values[row][col]`, dense
    pub values: Vec<Vec<UsageStats>>,
}

/// Per-user totals for one window, in chart row order.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UserUsageBars {
    pub duration_window: DurationWindow,
    pub rows: Vec<ChartRow>,
    pub counts: Vec<i64>,
    pub sum_utf8_length: Vec<i64>,
}

struct Column {
    key: String,
    label: String,
}

/// Builds the admin usage charts.
#[derive(Clone)]
pub struct ChartService {
    db: Arc<DbPool>,
    usage: UsageService,
}

impl ChartService {
    pub fn new(db: Arc<DbPool>, usage: UsageService) -> Self {
        Self { db, usage }
    }

    /// Active users ordered for display: commented users first by comment
    /// (descending), the rest after them, ties by name.
    async fn chart_users(&self) -> DbResult<Vec<User>> {
        let mut users = self.db.users().list_all(true).await?;
        users.sort_by(|a, b| a.name.cmp(&b.name));
        sort_users_by_comment(&mut users);
        Ok(users)
    }

    /// Users x instances (sorted by name).
    pub async fn instance_matrix(&self, window: DurationWindow) -> DbResult<UsageMatrix> {
        self.instance_matrix_at(Utc::now(), window).await
    }

    pub async fn instance_matrix_at(
        &self,
        now: DateTime<Utc>,
        window: DurationWindow,
    ) -> DbResult<UsageMatrix> {
        let users = self.chart_users().await?;
        let mut instances = self.db.instances().list().await?;
        instances.sort_by(|a, b| a.name.cmp(&b.name));

        let pairs: Vec<UserInstancePair> = users
            .iter()
            .flat_map(|u| {
                instances.iter().map(move |i| UserInstancePair {
                    user_id: u.id,
                    instance_id: i.id,
                })
            })
            .collect();
        let flat = self
            .usage
            .sum_instance_pairs_at(now, window, &pairs)
            .await?
            .into_iter()
            .map(|r| UsageStats {
                count: r.count,
                sum_utf8_length: r.sum_utf8_length,
            })
            .collect::<Vec<_>>();

        let columns: Vec<Column> = instances
            .iter()
            .map(|i| Column {
                key: i.id.to_string(),
                label: i.name.clone(),
            })
            .collect();

        Ok(assemble(window, &users, columns, flat))
    }

    /// Users x the given models, in the given order.
    pub async fn model_matrix(
        &self,
        window: DurationWindow,
        models: &[String],
    ) -> DbResult<UsageMatrix> {
        self.model_matrix_at(Utc::now(), window, models).await
    }

    pub async fn model_matrix_at(
        &self,
        now: DateTime<Utc>,
        window: DurationWindow,
        models: &[String],
    ) -> DbResult<UsageMatrix> {
        let users = self.chart_users().await?;

        let pairs: Vec<UserModelPair> = users
            .iter()
            .flat_map(|u| {
                models.iter().map(move |m| UserModelPair {
                    user_id: u.id,
                    model: m.clone(),
                })
            })
            .collect();
        let flat = self
            .usage
            .sum_model_pairs_at(now, window, &pairs)
            .await?
            .into_iter()
            .map(|r| UsageStats {
                count: r.count,
                sum_utf8_length: r.sum_utf8_length,
            })
            .collect::<Vec<_>>();

        let columns: Vec<Column> = models
            .iter()
            .map(|m| Column {
                key: m.clone(),
                label: m.clone(),
            })
            .collect();

        Ok(assemble(window, &users, columns, flat))
    }

    /// Totals per active user for one window.
    pub async fn user_bars(&self, window: DurationWindow) -> DbResult<UserUsageBars> {
        self.user_bars_at(Utc::now(), window).await
    }

    pub async fn user_bars_at(
        &self,
        now: DateTime<Utc>,
        window: DurationWindow,
    ) -> DbResult<UserUsageBars> {
        let users = self.chart_users().await?;
        let sums = self
            .usage
            .sum_windows_at(now, &[window], UsageFilter::default())
            .await?;

        let lookup: HashMap<Uuid, UsageStats> = sums
            .into_iter()
            .flat_map(|w| w.by_user)
            .map(|u| (u.user_id, u.stats()))
            .collect();

        let stats: Vec<UsageStats> = users
            .iter()
            .map(|u| lookup.get(&u.id).copied().unwrap_or_default())
            .collect();

        Ok(UserUsageBars {
            duration_window: window,
            rows: users.iter().map(ChartRow::from).collect(),
            counts: stats.iter().map(|s| s.count).collect(),
            sum_utf8_length: stats.iter().map(|s| s.sum_utf8_length).collect(),
        })
    }
}

/// Fold a row-major flat list into a dense matrix and per-column series.
fn assemble(
    window: DurationWindow,
    users: &[User],
    columns: Vec<Column>,
    flat: Vec<UsageStats>,
) -> UsageMatrix {
    let values = dense_matrix(users.len(), columns.len(), &flat);

    let series = columns
        .into_iter()
        .enumerate()
        .map(|(col, column)| ChartSeries {
            key: column.key,
            label: column.label,
            data: values.iter().map(|row| row[col].count).collect(),
        })
        .collect();

    UsageMatrix {
        duration_window: window,
        rows: users.iter().map(ChartRow::from).collect(),
        series,
        values,
    }
}

/// `rows x cols` matrix from a row-major slice. Missing cells are zero.
fn dense_matrix(rows: usize, cols: usize, flat: &[UsageStats]) -> Vec<Vec<UsageStats>> {
    (0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| flat.get(r * cols + c).copied().unwrap_or_default())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(count: i64) -> UsageStats {
        UsageStats {
            count,
            sum_utf8_length: count * 10,
        }
    }

    #[test]
    fn test_dense_matrix_row_major() {
        let flat = vec![stats(1), stats(2), stats(3), stats(4), stats(5), stats(6)];
        let m = dense_matrix(2, 3, &flat);
        assert_eq!(m[0][2].count, 3);
        assert_eq!(m[1][0].count, 4);
    }

    #[test]
    fn test_dense_matrix_fills_missing_with_zero() {
        let m = dense_matrix(2, 2, &[stats(1)]);
        assert_eq!(m[0][0].count, 1);
        assert_eq!(m[1][1], UsageStats::default());
    }

    #[test]
    fn test_dense_matrix_no_columns() {
        let m = dense_matrix(3, 0, &[]);
        assert_eq!(m.len(), 3);
        assert!(m.iter().all(|row| row.is_empty()));
    }
}
