use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::config::FeatureConfig;
use crate::elo::{EloConfig, EloTable};
use crate::error::{ForecastError, Result};
use crate::match_record::{Fixture, MatchKey, MatchOdds, MatchRecord, TeamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    EloHome,
    EloAway,
    EloDiff,
    EloExpectedHome,
    FormPointsHome,
    FormPointsAway,
    FormPointsDiff,
    GoalsForHome,
    GoalsAgainstHome,
    GoalsForAway,
    GoalsAgainstAway,
    GoalDiffAvgDiff,
    HomeWinRateHome,
    AwayWinRateAway,
    H2hMatches,
    H2hHomeWinRate,
    H2hDrawRate,
    RestDaysHome,
    RestDaysAway,
    RestDaysDiff,
    LastGoalDiffHome,
    LastGoalDiffAway,
    LastGoalTotalHome,
    LastGoalTotalAway,
    MatchesPlayedHome,
    MatchesPlayedAway,
    OddsImpliedHome,
    OddsImpliedDraw,
    OddsImpliedAway,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 29] = [
        Self::EloHome,
        Self::EloAway,
        Self::EloDiff,
        Self::EloExpectedHome,
        Self::FormPointsHome,
        Self::FormPointsAway,
        Self::FormPointsDiff,
        Self::GoalsForHome,
        Self::GoalsAgainstHome,
        Self::GoalsForAway,
        Self::GoalsAgainstAway,
        Self::GoalDiffAvgDiff,
        Self::HomeWinRateHome,
        Self::AwayWinRateAway,
        Self::H2hMatches,
        Self::H2hHomeWinRate,
        Self::H2hDrawRate,
        Self::RestDaysHome,
        Self::RestDaysAway,
        Self::RestDaysDiff,
        Self::LastGoalDiffHome,
        Self::LastGoalDiffAway,
        Self::LastGoalTotalHome,
        Self::LastGoalTotalAway,
        Self::MatchesPlayedHome,
        Self::MatchesPlayedAway,
        Self::OddsImpliedHome,
        Self::OddsImpliedDraw,
        Self::OddsImpliedAway,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::EloHome => "elo_home",
            Self::EloAway => "elo_away",
            Self::EloDiff => "elo_diff",
            Self::EloExpectedHome => "elo_expected_home",
            Self::FormPointsHome => "form_points_home",
            Self::FormPointsAway => "form_points_away",
            Self::FormPointsDiff => "form_points_diff",
            Self::GoalsForHome => "goals_for_home",
            Self::GoalsAgainstHome => "goals_against_home",
            Self::GoalsForAway => "goals_for_away",
            Self::GoalsAgainstAway => "goals_against_away",
            Self::GoalDiffAvgDiff => "goal_diff_avg_diff",
            Self::HomeWinRateHome => "home_win_rate_home",
            Self::AwayWinRateAway => "away_win_rate_away",
            Self::H2hMatches => "h2h_matches",
            Self::H2hHomeWinRate => "h2h_home_win_rate",
            Self::H2hDrawRate => "h2h_draw_rate",
            Self::RestDaysHome => "rest_days_home",
            Self::RestDaysAway => "rest_days_away",
            Self::RestDaysDiff => "rest_days_diff",
            Self::LastGoalDiffHome => "last_goal_diff_home",
            Self::LastGoalDiffAway => "last_goal_diff_away",
            Self::LastGoalTotalHome => "last_goal_total_home",
            Self::LastGoalTotalAway => "last_goal_total_away",
            Self::MatchesPlayedHome => "matches_played_home",
            Self::MatchesPlayedAway => "matches_played_away",
            Self::OddsImpliedHome => "odds_implied_home",
            Self::OddsImpliedDraw => "odds_implied_draw",
            Self::OddsImpliedAway => "odds_implied_away",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Everything except the odds block, which needs odds in the source.
    pub fn default_catalog() -> Vec<FeatureKind> {
        Self::ALL
            .into_iter()
            .filter(|kind| {
                !matches!(
                    kind,
                    Self::OddsImpliedHome | Self::OddsImpliedDraw | Self::OddsImpliedAway
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    kinds: Vec<FeatureKind>,
}

impl FeatureSchema {
    pub fn from_catalog<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Err(ForecastError::Config(
                "feature catalog is empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        let mut kinds = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let kind = FeatureKind::from_name(name)
                .ok_or_else(|| ForecastError::Config(format!("unknown feature name {name:?}")))?;
            if !seen.insert(kind) {
                return Err(ForecastError::Config(format!(
                    "feature {name:?} listed twice"
                )));
            }
            kinds.push(kind);
        }
        Ok(Self { kinds })
    }

    pub fn kinds(&self) -> &[FeatureKind] {
        &self.kinds
    }

    pub fn names(&self) -> Vec<String> {
        self.kinds.iter().map(|k| k.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn check(&self, fv: &FeatureVector) -> Result<()> {
        let expected: HashSet<&str> = self.kinds.iter().map(|k| k.name()).collect();
        let mut missing: Vec<String> = self
            .kinds
            .iter()
            .map(|k| k.name())
            .filter(|name| !fv.values.contains_key(*name))
            .map(str::to_string)
            .collect();
        let unexpected: Vec<String> = fv
            .values
            .keys()
            .filter(|name| !expected.contains(name.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() && unexpected.is_empty() {
            return Ok(());
        }
        missing.sort();
        Err(ForecastError::SchemaMismatch {
            missing,
            unexpected,
        })
    }

    pub fn extract(&self, fv: &FeatureVector) -> Result<Vec<f64>> {
        self.check(fv)?;
        Ok(self
            .kinds
            .iter()
            .map(|k| fv.values.get(k.name()).copied().unwrap_or(f64::NAN))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub subject: MatchKey,
    pub values: BTreeMap<String, f64>,
    pub defaults_applied: u32,
}

impl FeatureVector {
    pub fn new(subject: MatchKey, values: BTreeMap<String, f64>) -> Self {
        Self {
            subject,
            values,
            defaults_applied: 0,
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy)]
struct TeamGame {
    goals_for: f64,
    goals_against: f64,
    points: f64,
}

#[derive(Debug, Clone, Default)]
struct TeamState {
    recent: VecDeque<TeamGame>,
    last_date: Option<NaiveDate>,
    played: u32,
    home_played: u32,
    home_wins: u32,
    away_played: u32,
    away_wins: u32,
}

impl TeamState {
    fn push(&mut self, game: TeamGame, date: NaiveDate, keep: usize) {
        self.recent.push_back(game);
        while self.recent.len() > keep {
            self.recent.pop_front();
        }
        self.last_date = Some(date);
        self.played += 1;
    }

    fn mean_last(&self, n: usize, f: impl Fn(&TeamGame) -> f64) -> Option<f64> {
        let take = self.recent.len().min(n);
        if take == 0 {
            return None;
        }
        let sum: f64 = self.recent.iter().rev().take(take).map(f).sum();
        Some(sum / take as f64)
    }

    fn last(&self) -> Option<&TeamGame> {
        self.recent.back()
    }
}

/// Meetings counted from the point of view of `first` (the lower-sorting team).
#[derive(Debug, Clone, Copy, Default)]
struct PairState {
    meetings: u32,
    first_wins: u32,
    draws: u32,
}

struct FeatureEngine<'a> {
    cfg: &'a FeatureConfig,
    schema: FeatureSchema,
    elo: EloTable,
    teams: HashMap<TeamId, TeamState>,
    pairs: HashMap<(TeamId, TeamId), PairState>,
}

impl<'a> FeatureEngine<'a> {
    fn new(cfg: &'a FeatureConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            schema: FeatureSchema::from_catalog(&cfg.catalog)?,
            elo: EloTable::new(EloConfig {
                k: cfg.elo_k,
                home_adv_pts: cfg.elo_home_advantage,
                initial: cfg.elo_initial,
            }),
            teams: HashMap::new(),
            pairs: HashMap::new(),
        })
    }

    fn record(&mut self, m: &MatchRecord) {
        self.elo.apply(m);
        let keep = self.cfg.form_window.max(self.cfg.long_window);
        let hg = f64::from(m.home_goals);
        let ag = f64::from(m.away_goals);
        let points = |team: &TeamId| f64::from(m.points_for(team).unwrap_or(0));

        let home = self.teams.entry(m.home.clone()).or_default();
        home.push(
            TeamGame {
                goals_for: hg,
                goals_against: ag,
                points: points(&m.home),
            },
            m.date,
            keep,
        );
        home.home_played += 1;
        if m.home_goals > m.away_goals {
            home.home_wins += 1;
        }

        let away = self.teams.entry(m.away.clone()).or_default();
        away.push(
            TeamGame {
                goals_for: ag,
                goals_against: hg,
                points: points(&m.away),
            },
            m.date,
            keep,
        );
        away.away_played += 1;
        if m.away_goals > m.home_goals {
            away.away_wins += 1;
        }

        let (pair_key, home_is_first) = pair_key(&m.home, &m.away);
        let pair = self.pairs.entry(pair_key).or_default();
        pair.meetings += 1;
        if m.home_goals == m.away_goals {
            pair.draws += 1;
        } else if (m.home_goals > m.away_goals) == home_is_first {
            pair.first_wins += 1;
        }
    }

    fn vector(&self, subject: MatchKey, odds: Option<MatchOdds>) -> FeatureVector {
        let empty = TeamState::default();
        let home = self.teams.get(&subject.home).unwrap_or(&empty);
        let away = self.teams.get(&subject.away).unwrap_or(&empty);
        let d = &self.cfg.defaults;
        let form = self.cfg.form_window;
        let long = self.cfg.long_window;

        let mut values = BTreeMap::new();
        let mut defaults_applied = 0u32;
        let mut put = |kind: FeatureKind, value: Option<f64>, fallback: f64| {
            let v = match value {
                Some(v) => v,
                None => {
                    defaults_applied += 1;
                    fallback
                }
            };
            values.insert(kind.name().to_string(), v);
        };

        let has_home = home.played > 0;
        let has_away = away.played > 0;
        let elo_home = self.elo.rating(&subject.home);
        let elo_away = self.elo.rating(&subject.away);
        let known = |ok: bool, v: f64| if ok { Some(v) } else { None };

        let form_home = home.mean_last(form, |g| g.points);
        let form_away = away.mean_last(form, |g| g.points);
        let gf_home = home.mean_last(long, |g| g.goals_for);
        let ga_home = home.mean_last(long, |g| g.goals_against);
        let gf_away = away.mean_last(long, |g| g.goals_for);
        let ga_away = away.mean_last(long, |g| g.goals_against);
        let rest_home = rest_days(home.last_date, subject.date, self.cfg.max_rest_days);
        let rest_away = rest_days(away.last_date, subject.date, self.cfg.max_rest_days);

        let (pair_key, home_is_first) = pair_key(&subject.home, &subject.away);
        let pair = self.pairs.get(&pair_key).copied().unwrap_or_default();
        let h2h_rate = |count: u32| {
            (pair.meetings > 0).then(|| f64::from(count) / f64::from(pair.meetings))
        };
        let home_h2h_wins = if home_is_first {
            pair.first_wins
        } else {
            pair.meetings - pair.first_wins - pair.draws
        };
        let implied = odds.map(|o| o.implied());

        for kind in self.schema.kinds() {
            match kind {
                FeatureKind::EloHome => put(*kind, known(has_home, elo_home), elo_home),
                FeatureKind::EloAway => put(*kind, known(has_away, elo_away), elo_away),
                FeatureKind::EloDiff => put(
                    *kind,
                    known(has_home && has_away, elo_home - elo_away),
                    elo_home - elo_away,
                ),
                FeatureKind::EloExpectedHome => {
                    let e = self.elo.expected_home(&subject.home, &subject.away);
                    put(*kind, known(has_home && has_away, e), e)
                }
                FeatureKind::FormPointsHome => put(*kind, form_home, d.points_per_match),
                FeatureKind::FormPointsAway => put(*kind, form_away, d.points_per_match),
                FeatureKind::FormPointsDiff => put(
                    *kind,
                    form_home.zip(form_away).map(|(h, a)| h - a),
                    form_home.unwrap_or(d.points_per_match)
                        - form_away.unwrap_or(d.points_per_match),
                ),
                FeatureKind::GoalsForHome => put(*kind, gf_home, d.goals_per_match),
                FeatureKind::GoalsAgainstHome => put(*kind, ga_home, d.goals_per_match),
                FeatureKind::GoalsForAway => put(*kind, gf_away, d.goals_per_match),
                FeatureKind::GoalsAgainstAway => put(*kind, ga_away, d.goals_per_match),
                FeatureKind::GoalDiffAvgDiff => {
                    let gd = |gf: Option<f64>, ga: Option<f64>| {
                        gf.unwrap_or(d.goals_per_match) - ga.unwrap_or(d.goals_per_match)
                    };
                    let value = gd(gf_home, ga_home) - gd(gf_away, ga_away);
                    put(*kind, known(has_home && has_away, value), value)
                }
                FeatureKind::HomeWinRateHome => put(
                    *kind,
                    (home.home_played > 0)
                        .then(|| f64::from(home.home_wins) / f64::from(home.home_played)),
                    d.home_win_rate,
                ),
                FeatureKind::AwayWinRateAway => put(
                    *kind,
                    (away.away_played > 0)
                        .then(|| f64::from(away.away_wins) / f64::from(away.away_played)),
                    d.away_win_rate,
                ),
                FeatureKind::H2hMatches => put(*kind, Some(f64::from(pair.meetings)), 0.0),
                FeatureKind::H2hHomeWinRate => {
                    put(*kind, h2h_rate(home_h2h_wins), d.h2h_home_win_rate)
                }
                FeatureKind::H2hDrawRate => put(*kind, h2h_rate(pair.draws), d.h2h_draw_rate),
                FeatureKind::RestDaysHome => put(*kind, rest_home, d.rest_days),
                FeatureKind::RestDaysAway => put(*kind, rest_away, d.rest_days),
                FeatureKind::RestDaysDiff => put(
                    *kind,
                    rest_home.zip(rest_away).map(|(h, a)| h - a),
                    rest_home.unwrap_or(d.rest_days) - rest_away.unwrap_or(d.rest_days),
                ),
                FeatureKind::LastGoalDiffHome => put(
                    *kind,
                    home.last().map(|g| g.goals_for - g.goals_against),
                    d.last_goal_diff,
                ),
                FeatureKind::LastGoalDiffAway => put(
                    *kind,
                    away.last().map(|g| g.goals_for - g.goals_against),
                    d.last_goal_diff,
                ),
                FeatureKind::LastGoalTotalHome => put(
                    *kind,
                    home.last().map(|g| g.goals_for + g.goals_against),
                    d.last_goal_total,
                ),
                FeatureKind::LastGoalTotalAway => put(
                    *kind,
                    away.last().map(|g| g.goals_for + g.goals_against),
                    d.last_goal_total,
                ),
                FeatureKind::MatchesPlayedHome => put(*kind, Some(f64::from(home.played)), 0.0),
                FeatureKind::MatchesPlayedAway => put(*kind, Some(f64::from(away.played)), 0.0),
                FeatureKind::OddsImpliedHome => {
                    put(*kind, implied.map(|p| p[0]), d.odds_implied[0])
                }
                FeatureKind::OddsImpliedDraw => {
                    put(*kind, implied.map(|p| p[1]), d.odds_implied[1])
                }
                FeatureKind::OddsImpliedAway => {
                    put(*kind, implied.map(|p| p[2]), d.odds_implied[2])
                }
            }
        }

        if defaults_applied > 0 {
            debug!(subject = %subject, defaults_applied, "default feature values used");
        }
        FeatureVector {
            subject,
            values,
            defaults_applied,
        }
    }
}

fn pair_key(home: &TeamId, away: &TeamId) -> ((TeamId, TeamId), bool) {
    if home <= away {
        ((home.clone(), away.clone()), true)
    } else {
        ((away.clone(), home.clone()), false)
    }
}

fn rest_days(last: Option<NaiveDate>, date: NaiveDate, cap: f64) -> Option<f64> {
    last.map(|d| ((date - d).num_days() as f64).clamp(0.0, cap))
}

fn sorted_before<'m>(matches: &'m [MatchRecord], cutoff: NaiveDate) -> Vec<&'m MatchRecord> {
    let mut sorted: Vec<&MatchRecord> = matches.iter().filter(|m| m.date < cutoff).collect();
    sorted.sort_by(|a, b| (a.date, &a.home, &a.away).cmp(&(b.date, &b.home, &b.away)));
    sorted
}

fn report_defaults(vectors: &[FeatureVector], what: &str) {
    let affected = vectors.iter().filter(|v| v.defaults_applied > 0).count();
    if affected == 0 {
        return;
    }
    let values: u64 = vectors.iter().map(|v| u64::from(v.defaults_applied)).sum();
    warn!(
        what,
        vectors = affected,
        values,
        "missing history replaced by default feature values"
    );
}

/// One vector per match dated before `as_of`, each built only from matches
/// on strictly earlier dates. Output is ordered by `(date, home, away)`.
pub fn build_features(
    matches: &[MatchRecord],
    as_of: NaiveDate,
    cfg: &FeatureConfig,
) -> Result<Vec<FeatureVector>> {
    let mut engine = FeatureEngine::new(cfg)?;
    let sorted = sorted_before(matches, as_of);

    let mut out = Vec::with_capacity(sorted.len());
    for day in sorted.chunk_by(|a, b| a.date == b.date) {
        for m in day {
            out.push(engine.vector(m.key(), m.odds));
        }
        for m in day {
            engine.record(m);
        }
    }

    report_defaults(&out, "matches");
    Ok(out)
}

/// One vector per fixture, using matches before `min(fixture.date, as_of)`.
pub fn build_fixture_features(
    matches: &[MatchRecord],
    fixtures: &[Fixture],
    as_of: NaiveDate,
    cfg: &FeatureConfig,
) -> Result<Vec<FeatureVector>> {
    let mut engine = FeatureEngine::new(cfg)?;
    let sorted = sorted_before(matches, as_of);

    let mut pending: Vec<(NaiveDate, &Fixture)> = fixtures
        .iter()
        .map(|f| (f.date.min(as_of), f))
        .collect();
    pending.sort_by(|(ca, a), (cb, b)| {
        (ca, a.date, &a.home, &a.away).cmp(&(cb, b.date, &b.home, &b.away))
    });

    let mut next = 0usize;
    let mut out = Vec::with_capacity(pending.len());
    for (cutoff, fixture) in pending {
        while let Some(m) = sorted.get(next).filter(|m| m.date < cutoff) {
            engine.record(m);
            next += 1;
        }
        out.push(engine.vector(fixture.key(), fixture.odds));
    }

    report_defaults(&out, "fixtures");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{FeatureKind, FeatureSchema, build_features};
    use crate::config::FeatureConfig;
    use crate::error::ForecastError;
    use crate::match_record::{MatchRecord, TeamId};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn m(d: u32, home: &str, away: &str, hg: u16, ag: u16) -> MatchRecord {
        MatchRecord {
            date: day(d),
            home: TeamId::parse(home).unwrap(),
            away: TeamId::parse(away).unwrap(),
            home_goals: hg,
            away_goals: ag,
            odds: None,
        }
    }

    #[test]
    fn names_round_trip_through_kind() {
        for kind in FeatureKind::ALL {
            assert_eq!(FeatureKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn duplicate_catalog_entries_are_rejected() {
        let err = FeatureSchema::from_catalog(&["elo_diff", "elo_diff"]).unwrap_err();
        assert!(matches!(err, ForecastError::Config(_)));
    }

    #[test]
    fn same_day_matches_do_not_see_each_other() {
        let matches = vec![m(1, "A", "B", 3, 0), m(1, "A", "C", 0, 2)];
        let vectors = build_features(&matches, day(2), &FeatureConfig::default()).unwrap();
        assert_eq!(vectors.len(), 2);
        for v in &vectors {
            assert_eq!(v.get("matches_played_home"), Some(0.0));
        }
    }

    #[test]
    fn head_to_head_is_read_from_home_side() {
        let matches = vec![
            m(1, "A", "B", 2, 0),
            m(8, "B", "A", 1, 1),
            m(15, "B", "A", 0, 0),
        ];
        let vectors = build_features(&matches, day(16), &FeatureConfig::default()).unwrap();
        let third = &vectors[2];
        assert_eq!(third.get("h2h_matches"), Some(2.0));
        assert_eq!(third.get("h2h_home_win_rate"), Some(0.0));
        assert_eq!(third.get("h2h_draw_rate"), Some(0.5));
        assert_eq!(third.get("rest_days_home"), Some(7.0));
        assert_eq!(third.get("last_goal_diff_away"), Some(0.0));
    }
}
