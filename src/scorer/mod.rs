pub mod environment;
pub mod rank;

pub use environment::{rank_environment, EnvironmentRanks};
pub use rank::{rank_defense, RankCell, RankTable};

/// Orders `(team, value)` pairs by `(value asc, team asc)` and assigns ranks
/// `1..=n`. Input order does not affect the result.
pub(crate) fn rank_ascending<'a>(items: impl IntoIterator<Item = (&'a str, f64)>) -> Vec<(&'a str, u8)> {
    let mut items: Vec<(&str, f64)> = items.into_iter().collect();
    items.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    items
        .into_iter()
        .enumerate()
        .map(|(i, (team, _))| (team, u8::try_from(i + 1).unwrap_or(u8::MAX)))
        .collect()
}
