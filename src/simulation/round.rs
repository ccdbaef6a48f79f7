//! One elimination round, free of I/O
//!
//! Every random choice goes through the caller's `Rng`, so a seeded
//! `StdRng` replays a match exactly.

use crate::content::{render_template, ContentCatalog, ImageBag};
use crate::types::{EliminationEvent, NarrativeCategory, Participant, ResurrectionEvent};
use rand::seq::SliceRandom;
use rand::Rng;

pub const RESURRECTION_PROBABILITY: f64 = 0.18;

pub const MIN_FLAVOR_LINES: usize = 2;
pub const MAX_FLAVOR_LINES: usize = 3;

/// Placements recorded at the end of a match
pub const RECORDED_PLACEMENTS: usize = 3;

const FALLBACK_ELIMINATION: &str = "{victim} has been eliminated.";

pub fn kills_for(alive: usize) -> usize {
    (alive / 3).max(1)
}

/// Alive set plus ordered elimination history
#[derive(Debug, Clone)]
pub struct RoundState {
    alive: Vec<Participant>,
    eliminated: Vec<Participant>,
}

impl RoundState {
    pub fn new(participants: Vec<Participant>) -> Self {
        Self {
            alive: participants,
            eliminated: Vec::new(),
        }
    }

    pub fn alive(&self) -> &[Participant] {
        &self.alive
    }

    pub fn eliminated(&self) -> &[Participant] {
        &self.eliminated
    }

    pub fn is_finished(&self) -> bool {
        self.alive.len() <= 1
    }

    /// Winner first, then the elimination history from last to first,
    /// deduplicated and cut to the recorded placements
    pub fn final_ranking(&self) -> Vec<Participant> {
        let mut ranking: Vec<Participant> = Vec::with_capacity(RECORDED_PLACEMENTS);
        let candidates = self.alive.iter().take(1).chain(self.eliminated.iter().rev());
        for participant in candidates {
            if ranking.len() == RECORDED_PLACEMENTS {
                break;
            }
            if !ranking.iter().any(|p| p.id == participant.id) {
                ranking.push(participant.clone());
            }
        }
        ranking
    }
}

#[derive(Debug, Clone)]
pub struct RoundOutcome {
    /// Zero-based
    pub round: usize,
    pub alive_at_start: usize,
    pub eliminations: Vec<EliminationEvent>,
    pub resurrection: Option<ResurrectionEvent>,
    /// Narration in display order
    pub lines: Vec<String>,
    pub stage: String,
}

/// Run one round against `state`
pub fn play_round<R: Rng + ?Sized>(
    state: &mut RoundState,
    round: usize,
    catalog: &ContentCatalog,
    rng: &mut R,
) -> RoundOutcome {
    let alive_at_start = state.alive.len();
    let mut eliminations = Vec::new();
    let mut lines = Vec::new();

    for _ in 0..kills_for(alive_at_start) {
        if state.alive.len() <= 1 {
            break;
        }
        let victim = state.alive.remove(rng.gen_range(0..state.alive.len()));
        let (event, line) = narrate_elimination(victim, &state.alive, catalog, rng);
        state.eliminated.push(event.victim.clone());
        eliminations.push(event);
        lines.push(line);
    }

    insert_flavor_lines(&mut lines, state, catalog, rng);

    let resurrection = maybe_resurrect(state, catalog, rng).map(|(event, line)| {
        lines.push(line);
        event
    });

    RoundOutcome {
        round,
        alive_at_start,
        eliminations,
        resurrection,
        lines,
        stage: catalog.stage(round).to_string(),
    }
}

fn narrate_elimination<R: Rng + ?Sized>(
    victim: Participant,
    remaining: &[Participant],
    catalog: &ContentCatalog,
    rng: &mut R,
) -> (EliminationEvent, String) {
    let mut category = *NarrativeCategory::ALL.choose(rng).unwrap_or(&NarrativeCategory::Environmental);

    let killer = match category {
        NarrativeCategory::Sabotage => {
            let killer = remaining.choose(rng).cloned();
            if killer.is_none() {
                category = NarrativeCategory::Environmental;
            }
            killer
        }
        _ => None,
    };

    let template = catalog
        .templates(category)
        .choose(rng)
        .map(String::as_str)
        .unwrap_or(FALLBACK_ELIMINATION);
    let line = render_template(
        template,
        Some(&victim.display_name),
        killer.as_ref().map(|k| k.display_name.as_str()),
        None,
    );

    (EliminationEvent { victim, killer, category }, line)
}

fn insert_flavor_lines<R: Rng + ?Sized>(
    lines: &mut Vec<String>,
    state: &RoundState,
    catalog: &ContentCatalog,
    rng: &mut R,
) {
    if catalog.flavor.is_empty() {
        return;
    }
    let pool = if state.alive.is_empty() {
        &state.eliminated
    } else {
        &state.alive
    };

    for _ in 0..rng.gen_range(MIN_FLAVOR_LINES..=MAX_FLAVOR_LINES) {
        let (Some(template), Some(player)) = (catalog.flavor.choose(rng), pool.choose(rng)) else {
            return;
        };
        let line = render_template(template, None, None, Some(&player.display_name));
        let position = rng.gen_range(0..=lines.len());
        lines.insert(position, line);
    }
}

fn maybe_resurrect<R: Rng + ?Sized>(
    state: &mut RoundState,
    catalog: &ContentCatalog,
    rng: &mut R,
) -> Option<(ResurrectionEvent, String)> {
    if state.eliminated.is_empty() || !catalog.has_revival_content() {
        return None;
    }
    if !rng.gen_bool(RESURRECTION_PROBABILITY) {
        return None;
    }

    let template = catalog.revival.choose(rng)?;
    let revived = state.eliminated.remove(rng.gen_range(0..state.eliminated.len()));
    let line = render_template(template, None, None, Some(&revived.display_name));
    state.alive.push(revived.clone());

    Some((ResurrectionEvent { revived }, line))
}

/// Stage image: the locked image on the first round, then the shuffled bag
pub fn select_image<R: Rng + ?Sized>(
    round: usize,
    catalog: &ContentCatalog,
    bag: &mut ImageBag,
    rng: &mut R,
) -> Option<String> {
    if round == 0 && !catalog.locked_image.is_empty() {
        return Some(catalog.locked_image.clone());
    }
    bag.draw(rng)
}
