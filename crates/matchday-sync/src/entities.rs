//! Entity catalogue: endpoint, target table, conflict key, scope and the
//! field mapping from provider records to rows.

use std::fmt;

use serde_json::{json, Value};

use crate::error::TransformError;
use crate::provider::Query;
use crate::store::Row;

/// What to sync: the season plus the leagues, countries and teams in scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncScope {
    pub season: u16,
    pub leagues: Vec<u32>,
    pub countries: Vec<String>,
    pub teams: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Countries,
    Leagues,
    Venues,
    Teams,
    Coaches,
    Fixtures,
    Standings,
    Players,
    Injuries,
    Transfers,
    Odds,
}

impl Entity {
    pub const ALL: [Entity; 11] = [
        Entity::Countries,
        Entity::Leagues,
        Entity::Venues,
        Entity::Teams,
        Entity::Coaches,
        Entity::Fixtures,
        Entity::Standings,
        Entity::Players,
        Entity::Injuries,
        Entity::Transfers,
        Entity::Odds,
    ];

    /// Job id and table name.
    pub fn id(self) -> &'static str {
        match self {
            Entity::Countries => "countries",
            Entity::Leagues => "leagues",
            Entity::Venues => "venues",
            Entity::Teams => "teams",
            Entity::Coaches => "coaches",
            Entity::Fixtures => "fixtures",
            Entity::Standings => "standings",
            Entity::Players => "players",
            Entity::Injuries => "injuries",
            Entity::Transfers => "transfers",
            Entity::Odds => "odds",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.id() == id)
    }

    pub fn table(self) -> &'static str {
        self.id()
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            Entity::Coaches => "coachs",
            other => other.id(),
        }
    }

    pub fn conflict_keys(self) -> &'static [&'static str] {
        match self {
            Entity::Countries => &["name"],
            Entity::Standings => &["league_id", "season", "team_id"],
            Entity::Players => &["id", "season"],
            Entity::Injuries => &["player_id", "fixture_id"],
            Entity::Transfers => &["player_id", "transfer_date", "team_in_id"],
            Entity::Odds => &["fixture_id", "bookmaker_id", "bet_id"],
            _ => &["id"],
        }
    }

    /// Endpoints that return `paging.total > 1`.
    pub fn paged(self) -> bool {
        matches!(self, Entity::Players | Entity::Odds)
    }

    /// One query per unit of scope. Empty when the scope has nothing for
    /// this entity (no leagues configured, say).
    pub fn queries(self, scope: &SyncScope) -> Vec<Query> {
        let per_league = || -> Vec<Query> {
            scope
                .leagues
                .iter()
                .map(|l| Query::new().param("league", l).param("season", scope.season))
                .collect()
        };
        let per_team = || -> Vec<Query> {
            scope
                .teams
                .iter()
                .map(|t| Query::new().param("team", t))
                .collect()
        };
        match self {
            Entity::Countries => vec![Query::new()],
            Entity::Leagues if scope.leagues.is_empty() => {
                vec![Query::new().param("season", scope.season)]
            }
            Entity::Leagues => scope
                .leagues
                .iter()
                .map(|l| Query::new().param("id", l).param("season", scope.season))
                .collect(),
            Entity::Venues => scope
                .countries
                .iter()
                .map(|c| Query::new().param("country", c))
                .collect(),
            Entity::Coaches | Entity::Transfers => per_team(),
            Entity::Teams
            | Entity::Fixtures
            | Entity::Standings
            | Entity::Players
            | Entity::Injuries
            | Entity::Odds => per_league(),
        }
    }

    /// Map one provider record onto zero or more rows.
    pub fn transform(self, record: &Value) -> Result<Vec<Row>, TransformError> {
        let f = Fields {
            entity: self.id(),
            record,
        };
        match self {
            Entity::Countries => Ok(vec![row(json!({
                "name": f.required(&["name"])?,
                "code": f.get(&["code"]),
                "flag": f.get(&["flag"]),
            }))]),
            Entity::Leagues => {
                let current_season = record["seasons"]
                    .as_array()
                    .and_then(|s| s.iter().find(|s| s["current"] == Value::Bool(true)))
                    .map(|s| s["year"].clone())
                    .unwrap_or(Value::Null);
                Ok(vec![row(json!({
                    "id": f.required(&["league", "id"])?,
                    "name": f.required(&["league", "name"])?,
                    "type": f.get(&["league", "type"]),
                    "logo": f.get(&["league", "logo"]),
                    "country_name": f.get(&["country", "name"]),
                    "current_season": current_season,
                }))])
            }
            Entity::Venues => Ok(vec![row(json!({
                "id": f.required(&["id"])?,
                "name": f.get(&["name"]),
                "address": f.get(&["address"]),
                "city": f.get(&["city"]),
                "country": f.get(&["country"]),
                "capacity": f.get(&["capacity"]),
                "surface": f.get(&["surface"]),
                "image": f.get(&["image"]),
            }))]),
            Entity::Teams => Ok(vec![row(json!({
                "id": f.required(&["team", "id"])?,
                "name": f.required(&["team", "name"])?,
                "code": f.get(&["team", "code"]),
                "country": f.get(&["team", "country"]),
                "founded": f.get(&["team", "founded"]),
                "national": f.get(&["team", "national"]),
                "logo": f.get(&["team", "logo"]),
                "venue_id": f.get(&["venue", "id"]),
            }))]),
            Entity::Coaches => Ok(vec![row(json!({
                "id": f.required(&["id"])?,
                "name": f.get(&["name"]),
                "firstname": f.get(&["firstname"]),
                "lastname": f.get(&["lastname"]),
                "age": f.get(&["age"]),
                "nationality": f.get(&["nationality"]),
                "photo": f.get(&["photo"]),
                "team_id": f.get(&["team", "id"]),
            }))]),
            Entity::Fixtures => Ok(vec![row(json!({
                "id": f.required(&["fixture", "id"])?,
                "referee": f.get(&["fixture", "referee"]),
                "date": f.get(&["fixture", "date"]),
                "timestamp": f.get(&["fixture", "timestamp"]),
                "venue_id": f.get(&["fixture", "venue", "id"]),
                "status_short": f.get(&["fixture", "status", "short"]),
                "status_long": f.get(&["fixture", "status", "long"]),
                "elapsed": f.get(&["fixture", "status", "elapsed"]),
                "league_id": f.required(&["league", "id"])?,
                "season": f.get(&["league", "season"]),
                "round": f.get(&["league", "round"]),
                "home_team_id": f.required(&["teams", "home", "id"])?,
                "away_team_id": f.required(&["teams", "away", "id"])?,
                "home_goals": f.get(&["goals", "home"]),
                "away_goals": f.get(&["goals", "away"]),
            }))]),
            Entity::Standings => {
                let league_id = f.required(&["league", "id"])?;
                let season = f.required(&["league", "season"])?;
                let groups = record["league"]["standings"]
                    .as_array()
                    .ok_or_else(|| f.missing(&["league", "standings"]))?;
                let mut rows = Vec::new();
                for entry in groups.iter().filter_map(Value::as_array).flatten() {
                    let e = Fields {
                        entity: self.id(),
                        record: entry,
                    };
                    rows.push(row(json!({
                        "league_id": league_id,
                        "season": season,
                        "team_id": e.required(&["team", "id"])?,
                        "rank": e.get(&["rank"]),
                        "points": e.get(&["points"]),
                        "goals_diff": e.get(&["goalsDiff"]),
                        "group_name": e.get(&["group"]),
                        "form": e.get(&["form"]),
                        "played": e.get(&["all", "played"]),
                        "win": e.get(&["all", "win"]),
                        "draw": e.get(&["all", "draw"]),
                        "lose": e.get(&["all", "lose"]),
                        "goals_for": e.get(&["all", "goals", "for"]),
                        "goals_against": e.get(&["all", "goals", "against"]),
                    })));
                }
                Ok(rows)
            }
            Entity::Players => {
                let stats = Fields {
                    entity: self.id(),
                    record: &record["statistics"][0],
                };
                Ok(vec![row(json!({
                    "id": f.required(&["player", "id"])?,
                    "season": stats.required(&["league", "season"])?,
                    "name": f.get(&["player", "name"]),
                    "firstname": f.get(&["player", "firstname"]),
                    "lastname": f.get(&["player", "lastname"]),
                    "age": f.get(&["player", "age"]),
                    "nationality": f.get(&["player", "nationality"]),
                    "photo": f.get(&["player", "photo"]),
                    "team_id": stats.get(&["team", "id"]),
                    "league_id": stats.get(&["league", "id"]),
                    "position": stats.get(&["games", "position"]),
                    // Provider spelling.
                    "appearances": stats.get(&["games", "appearences"]),
                    "goals": stats.get(&["goals", "total"]),
                    "assists": stats.get(&["goals", "assists"]),
                    "rating": stats.get(&["games", "rating"]),
                }))])
            }
            Entity::Injuries => Ok(vec![row(json!({
                "player_id": f.required(&["player", "id"])?,
                "fixture_id": f.required(&["fixture", "id"])?,
                "team_id": f.get(&["team", "id"]),
                "league_id": f.get(&["league", "id"]),
                "season": f.get(&["league", "season"]),
                "type": f.get(&["player", "type"]),
                "reason": f.get(&["player", "reason"]),
                "date": f.get(&["fixture", "date"]),
            }))]),
            Entity::Transfers => {
                let player_id = f.required(&["player", "id"])?;
                let moves = record["transfers"]
                    .as_array()
                    .ok_or_else(|| f.missing(&["transfers"]))?;
                moves
                    .iter()
                    .map(|m| -> Result<Row, TransformError> {
                        let t = Fields {
                            entity: self.id(),
                            record: m,
                        };
                        Ok(row(json!({
                            "player_id": player_id,
                            "transfer_date": t.required(&["date"])?,
                            "team_in_id": t.required(&["teams", "in", "id"])?,
                            "team_out_id": t.get(&["teams", "out", "id"]),
                            "type": t.get(&["type"]),
                        })))
                    })
                    .collect()
            }
            Entity::Odds => {
                let fixture_id = f.required(&["fixture", "id"])?;
                let updated = f.get(&["update"]);
                let mut rows = Vec::new();
                for bookmaker in record["bookmakers"].as_array().into_iter().flatten() {
                    let b = Fields {
                        entity: self.id(),
                        record: bookmaker,
                    };
                    let bookmaker_id = b.required(&["id"])?;
                    for bet in bookmaker["bets"].as_array().into_iter().flatten() {
                        let bt = Fields {
                            entity: self.id(),
                            record: bet,
                        };
                        rows.push(row(json!({
                            "fixture_id": fixture_id,
                            "bookmaker_id": bookmaker_id,
                            "bet_id": bt.required(&["id"])?,
                            "bookmaker_name": b.get(&["name"]),
                            "bet_name": bt.get(&["name"]),
                            "odd_values": bt.get(&["values"]),
                            "updated": updated,
                        })));
                    }
                }
                Ok(rows)
            }
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

struct Fields<'a> {
    entity: &'static str,
    record: &'a Value,
}

impl Fields<'_> {
    fn get(&self, path: &[&str]) -> Value {
        path.iter()
            .fold(self.record, |v, key| &v[*key])
            .clone()
    }

    fn required(&self, path: &[&str]) -> Result<Value, TransformError> {
        let v = self.get(path);
        if v.is_null() {
            Err(self.missing(path))
        } else {
            Ok(v)
        }
    }

    fn missing(&self, path: &[&str]) -> TransformError {
        TransformError {
            entity: self.entity,
            field: path.join("."),
        }
    }
}

fn row(v: Value) -> Row {
    match v {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}
