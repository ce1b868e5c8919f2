use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use itertools::Itertools;
use thiserror::Error;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

use super::db_structs::{Game, PlayerRatingSnapshot, RosterEntry, RoundStat};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("duplicate snapshot for player {player_id} in match {game_id}")]
    DuplicateSnapshot { game_id: i64, player_id: i64 }
}

/// The storage handle the scheduler is given. The snapshot ledger behind it is
/// append-only: rows are inserted once per (player, match) and never updated.
#[async_trait]
pub trait RatingStore {
    /// Latest snapshot per player, used to seed prior resolution for a run.
    async fn latest_snapshots(&self) -> Result<Vec<PlayerRatingSnapshot>, StoreError>;

    /// Matches with at least one roster player lacking a snapshot, ascending
    /// by `(begin_at, id)` so tied timestamps are serialized deterministically.
    async fn matches_needing_rating(&self) -> Result<Vec<Game>, StoreError>;

    async fn rosters(&self, game_id: i64) -> Result<Vec<RosterEntry>, StoreError>;

    async fn round_stats(&self, game_id: i64) -> Result<Vec<RoundStat>, StoreError>;

    /// Snapshots already persisted for this match by an earlier run.
    async fn snapshots_for_match(&self, game_id: i64) -> Result<Vec<PlayerRatingSnapshot>, StoreError>;

    async fn insert_snapshots(&self, snapshots: &[PlayerRatingSnapshot]) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct DbClient {
    client: Arc<Client>
}

impl DbClient {
    // Connect to the database and return a DbClient instance
    pub async fn connect(connection_str: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(connection_str, NoTls).await?;

        // Spawn the connection object to run in the background
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("connection error: {}", e);
            }
        });

        Ok(DbClient {
            client: Arc::new(client)
        })
    }

    /// The full ledger for one player, ascending by match time. Read interface
    /// for downstream feature computation.
    pub async fn player_snapshots(&self, player_id: i64) -> Result<Vec<PlayerRatingSnapshot>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT game_id, player_id, begin_at, \
                 rating_pre, deviation_pre, volatility_pre, \
                 rating_post, deviation_post, volatility_post \
                 FROM player_glicko WHERE player_id = $1 \
                 ORDER BY begin_at ASC, game_id ASC",
                &[&player_id]
            )
            .await?;

        Ok(rows.iter().map(Self::snapshot_from_row).collect_vec())
    }

    /// The player's rating as of a point in time: the newest snapshot at or
    /// before `at`. `None` for a player with no history by then.
    pub async fn snapshot_asof(
        &self,
        player_id: i64,
        at: DateTime<FixedOffset>
    ) -> Result<Option<PlayerRatingSnapshot>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT game_id, player_id, begin_at, \
                 rating_pre, deviation_pre, volatility_pre, \
                 rating_post, deviation_post, volatility_post \
                 FROM player_glicko WHERE player_id = $1 AND begin_at <= $2 \
                 ORDER BY begin_at DESC, game_id DESC LIMIT 1",
                &[&player_id, &at]
            )
            .await?;

        Ok(rows.first().map(Self::snapshot_from_row))
    }

    fn game_from_row(row: &Row) -> Game {
        Game {
            id: row.get("id"),
            begin_at: row.get("begin_at"),
            winner_team_id: row.get("winner_team_id"),
            loser_team_id: row.get("loser_team_id"),
            winner_score: row.get("winner_score"),
            loser_score: row.get("loser_score"),
            rounds_count: row.get("rounds_count")
        }
    }

    fn roster_from_row(row: &Row) -> RosterEntry {
        RosterEntry {
            game_id: row.get("game_id"),
            player_id: row.get("player_id"),
            team_id: row.get("team_id")
        }
    }

    fn round_stat_from_row(row: &Row) -> RoundStat {
        RoundStat {
            game_id: row.get("game_id"),
            player_id: row.get("player_id"),
            round_number: row.get("round_number"),
            kills: row.get("kills"),
            deaths: row.get("deaths"),
            assists: row.get("assists"),
            damage: row.get("damage"),
            team_damage: row.get("team_damage")
        }
    }

    fn snapshot_from_row(row: &Row) -> PlayerRatingSnapshot {
        PlayerRatingSnapshot {
            game_id: row.get("game_id"),
            player_id: row.get("player_id"),
            begin_at: row.get("begin_at"),
            rating_pre: row.get("rating_pre"),
            deviation_pre: row.get("deviation_pre"),
            volatility_pre: row.get("volatility_pre"),
            rating_post: row.get("rating_post"),
            deviation_post: row.get("deviation_post"),
            volatility_post: row.get("volatility_post")
        }
    }
}

#[async_trait]
impl RatingStore for DbClient {
    async fn latest_snapshots(&self) -> Result<Vec<PlayerRatingSnapshot>, StoreError> {
        info!("Fetching latest snapshots per player...");
        let rows = self
            .client
            .query(
                "SELECT DISTINCT ON (player_id) \
                 game_id, player_id, begin_at, \
                 rating_pre, deviation_pre, volatility_pre, \
                 rating_post, deviation_post, volatility_post \
                 FROM player_glicko \
                 ORDER BY player_id, begin_at DESC, game_id DESC",
                &[]
            )
            .await?;

        info!("Fetched {} snapshot pointers", rows.len());
        Ok(rows.iter().map(Self::snapshot_from_row).collect_vec())
    }

    async fn matches_needing_rating(&self) -> Result<Vec<Game>, StoreError> {
        // A match stays in the backlog until every roster player has a
        // snapshot, so partially-persisted matches are retried player by
        // player. Matches without a decided winner or without round telemetry
        // cannot be rated and are excluded at the source.
        info!("Fetching matches awaiting rating...");
        let rows = self
            .client
            .query(
                "SELECT g.id, g.begin_at, g.winner_team_id, g.loser_team_id, \
                 g.winner_score, g.loser_score, g.rounds_count \
                 FROM games g \
                 WHERE g.winner_team_id IS NOT NULL \
                   AND g.loser_team_id IS NOT NULL \
                   AND g.rounds_count IS NOT NULL \
                   AND EXISTS (SELECT 1 FROM round_player_stats rps WHERE rps.game_id = g.id) \
                   AND (NOT EXISTS (SELECT 1 FROM player_glicko pg WHERE pg.game_id = g.id) \
                        OR EXISTS (SELECT 1 FROM game_rosters gr \
                                   LEFT JOIN player_glicko pg2 \
                                     ON pg2.game_id = g.id AND pg2.player_id = gr.player_id \
                                   WHERE gr.game_id = g.id AND pg2.player_id IS NULL)) \
                 ORDER BY g.begin_at ASC, g.id ASC",
                &[]
            )
            .await?;

        info!("Found {} matches awaiting rating", rows.len());
        Ok(rows.iter().map(Self::game_from_row).collect_vec())
    }

    async fn rosters(&self, game_id: i64) -> Result<Vec<RosterEntry>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT game_id, player_id, team_id FROM game_rosters \
                 WHERE game_id = $1 ORDER BY player_id",
                &[&game_id]
            )
            .await?;

        Ok(rows.iter().map(Self::roster_from_row).collect_vec())
    }

    async fn round_stats(&self, game_id: i64) -> Result<Vec<RoundStat>, StoreError> {
        // Team damage for a round is the aggregate row of the player's own
        // team in that round; both sides of the join come from the scraper.
        let rows = self
            .client
            .query(
                "SELECT rps.game_id, rps.player_id, rps.round_number, \
                 rps.kills, rps.deaths, rps.assists, rps.damage, \
                 rts.damage AS team_damage \
                 FROM round_player_stats rps \
                 LEFT JOIN round_team_stats rts \
                   ON rts.game_id = rps.game_id \
                  AND rts.round_number = rps.round_number \
                  AND rts.team_id = rps.team_id \
                 WHERE rps.game_id = $1 \
                 ORDER BY rps.round_number ASC, rps.player_id ASC",
                &[&game_id]
            )
            .await?;

        Ok(rows.iter().map(Self::round_stat_from_row).collect_vec())
    }

    async fn snapshots_for_match(&self, game_id: i64) -> Result<Vec<PlayerRatingSnapshot>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT game_id, player_id, begin_at, \
                 rating_pre, deviation_pre, volatility_pre, \
                 rating_post, deviation_post, volatility_post \
                 FROM player_glicko WHERE game_id = $1 ORDER BY player_id",
                &[&game_id]
            )
            .await?;

        Ok(rows.iter().map(Self::snapshot_from_row).collect_vec())
    }

    async fn insert_snapshots(&self, snapshots: &[PlayerRatingSnapshot]) -> Result<(), StoreError> {
        if snapshots.is_empty() {
            return Ok(());
        }

        // One multi-row statement per match keeps the persist step atomic:
        // either every snapshot of the match lands or none do.
        let mut query = String::from(
            "INSERT INTO player_glicko (game_id, player_id, begin_at, \
             rating_pre, deviation_pre, volatility_pre, \
             rating_post, deviation_post, volatility_post) VALUES "
        );
        let mut placeholders: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn postgres_types::ToSql + Sync)> = Vec::new();

        for (i, snapshot) in snapshots.iter().enumerate() {
            let base = i * 9;
            placeholders.push(format!(
                "(${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${})",
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5,
                base + 6,
                base + 7,
                base + 8,
                base + 9
            ));

            params.push(&snapshot.game_id);
            params.push(&snapshot.player_id);
            params.push(&snapshot.begin_at);
            params.push(&snapshot.rating_pre);
            params.push(&snapshot.deviation_pre);
            params.push(&snapshot.volatility_pre);
            params.push(&snapshot.rating_post);
            params.push(&snapshot.deviation_post);
            params.push(&snapshot.volatility_post);
        }

        query.push_str(&placeholders.join(", "));

        self.client.execute(query.as_str(), &params).await?;
        Ok(())
    }
}
