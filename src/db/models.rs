/// Row types for the tables in `migrations/`. Read with `sqlx::query_as`.

#[derive(Debug, sqlx::FromRow)]
pub struct SnapshotRow {
    pub slate_date: String,
    pub window_key: String,
    pub as_of_date: String,
    pub payload: String,
    pub invalidated: i64,
    pub updated_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SeasonLogsRow {
    pub season: String,
    pub payload: String,
    pub max_game_date: Option<String>,
    pub row_count: i64,
    pub fetched_at: String,
}
