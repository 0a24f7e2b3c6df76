//! Prompt dealing and connectivity-driven reassignment.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ident::new_id;
use crate::room::Player;
use crate::template::TemplateDefinition;

/// One blank in the current round, held by at most one player at a time.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub id: String,
    pub slot_id: String,
    pub slot_type: String,
    pub label: String,
    pub assigned_player_id: Option<String>,
    pub submitted: bool,
    pub value: Option<String>,
    pub assigned_at: Instant,
    pub submitted_at: Option<Instant>,
    pub last_reassigned_at: Option<Instant>,
}

/// Deal a fresh set of prompts for a round.
///
/// The template's slot list is repeated cyclically until the deck holds
/// `max(slot_count, prompts_per_player * player_count)` prompts, then dealt
/// round-robin in player join order. The starting player rotates by
/// `round_index % player_count` so replays don't hand the same person the
/// same slot types every time.
pub fn deal(
    template: &TemplateDefinition,
    players: &[Player],
    prompts_per_player: usize,
    round_index: u32,
) -> Vec<Prompt> {
    if players.is_empty() || template.slots.is_empty() {
        return Vec::new();
    }
    let count = template.slots.len().max(prompts_per_player * players.len());
    let offset = round_index as usize % players.len();
    let now = Instant::now();
    (0..count)
        .map(|i| {
            let slot = &template.slots[i % template.slots.len()];
            let holder = &players[(offset + i) % players.len()];
            Prompt {
                id: new_id("prompt"),
                slot_id: slot.id.clone(),
                slot_type: slot.slot_type.clone(),
                label: slot.label.clone(),
                assigned_player_id: Some(holder.id.clone()),
                submitted: false,
                value: None,
                assigned_at: now,
                submitted_at: None,
                last_reassigned_at: None,
            }
        })
        .collect()
}

/// Move unsubmitted prompts away from players who have been disconnected for
/// longer than `grace`. Receivers are connected players with the fewest
/// outstanding prompts; ties go to the earliest joiner. Returns true if any
/// prompt moved.
pub fn reassign_from_disconnected(
    prompts: &mut [Prompt],
    players: &[Player],
    grace: Duration,
    now: Instant,
) -> bool {
    let gone: Vec<&str> = players
        .iter()
        .filter(|p| {
            !p.connected
                && p.disconnected_at
                    .is_some_and(|at| now.duration_since(at) >= grace)
        })
        .map(|p| p.id.as_str())
        .collect();
    if gone.is_empty() {
        return false;
    }
    let candidates: Vec<&Player> = players.iter().filter(|p| p.connected).collect();
    move_prompts(prompts, |holder| gone.contains(&holder), &candidates, now)
}

/// Redistribute a removed (left or kicked) player's unsubmitted prompts
/// immediately, bypassing the disconnect grace. Prefers connected receivers,
/// falling back to everyone still in the room; with nobody left the prompts
/// become unassigned.
pub fn redistribute_from_removed(
    prompts: &mut [Prompt],
    removed_player_id: &str,
    remaining: &[Player],
    now: Instant,
) -> bool {
    let connected: Vec<&Player> = remaining.iter().filter(|p| p.connected).collect();
    let candidates: Vec<&Player> = if connected.is_empty() {
        remaining.iter().collect()
    } else {
        connected
    };
    if candidates.is_empty() {
        let mut changed = false;
        for prompt in prompts.iter_mut() {
            if prompt.assigned_player_id.as_deref() == Some(removed_player_id) && !prompt.submitted
            {
                prompt.assigned_player_id = None;
                prompt.last_reassigned_at = Some(now);
                changed = true;
            }
        }
        return changed;
    }
    move_prompts(
        prompts,
        |holder| holder == removed_player_id,
        &candidates,
        now,
    )
}

fn move_prompts(
    prompts: &mut [Prompt],
    from: impl Fn(&str) -> bool,
    candidates: &[&Player],
    now: Instant,
) -> bool {
    if candidates.is_empty() {
        return false;
    }
    let mut outstanding: HashMap<&str, usize> =
        candidates.iter().map(|p| (p.id.as_str(), 0)).collect();
    for prompt in prompts.iter() {
        if prompt.submitted {
            continue;
        }
        if let Some(ref holder) = prompt.assigned_player_id
            && let Some(count) = outstanding.get_mut(holder.as_str())
        {
            *count += 1;
        }
    }

    let mut changed = false;
    for prompt in prompts.iter_mut() {
        let moves = prompt
            .assigned_player_id
            .as_deref()
            .is_some_and(|holder| from(holder))
            && !prompt.submitted;
        if !moves {
            continue;
        }
        // Fewest outstanding wins; ties break toward the earliest joiner.
        let assignee = candidates
            .iter()
            .min_by_key(|p| (outstanding[p.id.as_str()], p.joined_at))
            .expect("candidates is non-empty");
        *outstanding.get_mut(assignee.id.as_str()).expect("counted above") += 1;
        prompt.assigned_player_id = Some(assignee.id.clone());
        prompt.last_reassigned_at = Some(now);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::template_definition;
    use crate::test_helpers::make_room;

    #[test]
    fn deals_cyclic_slots_round_robin() {
        let room = make_room(2);
        let template = template_definition("t-forest-mishap").unwrap();
        let prompts = deal(template, &room.players, 3, 0);

        // 6 slots, 2 players x 3 prompts: deck is exactly the slot list.
        assert_eq!(prompts.len(), 6);
        let first = &room.players[0].id;
        let second = &room.players[1].id;
        for (i, prompt) in prompts.iter().enumerate() {
            assert_eq!(prompt.slot_id, template.slots[i % 6].id);
            let expected = if i % 2 == 0 { first } else { second };
            assert_eq!(prompt.assigned_player_id.as_ref(), Some(expected));
            assert!(!prompt.submitted);
            assert!(prompt.value.is_none());
        }
    }

    #[test]
    fn deck_grows_with_player_count() {
        let room = make_room(4);
        let template = template_definition("t-forest-mishap").unwrap();
        // 4 players x 3 prompts > 6 slots, so slots repeat.
        let prompts = deal(template, &room.players, 3, 0);
        assert_eq!(prompts.len(), 12);
        assert_eq!(prompts[6].slot_id, prompts[0].slot_id);
        for player in &room.players {
            let held = prompts
                .iter()
                .filter(|p| p.assigned_player_id.as_deref() == Some(&player.id))
                .count();
            assert_eq!(held, 3);
        }
    }

    #[test]
    fn start_rotates_by_round_index() {
        let room = make_room(3);
        let template = template_definition("t-forest-mishap").unwrap();
        let round0 = deal(template, &room.players, 2, 0);
        let round1 = deal(template, &room.players, 2, 1);
        assert_eq!(
            round0[0].assigned_player_id.as_ref(),
            Some(&room.players[0].id)
        );
        assert_eq!(
            round1[0].assigned_player_id.as_ref(),
            Some(&room.players[1].id)
        );
    }

    #[test]
    fn reassigns_only_after_grace() {
        let mut room = make_room(3);
        let template = template_definition("t-forest-mishap").unwrap();
        let mut prompts = deal(template, &room.players, 2, 0);
        let gone = room.players[1].id.clone();
        room.players[1].connected = false;
        room.players[1].disconnected_at = Some(Instant::now());

        let grace = Duration::from_secs(30);
        assert!(!reassign_from_disconnected(
            &mut prompts,
            &room.players,
            grace,
            Instant::now()
        ));

        // Pretend the grace has elapsed.
        let later = Instant::now() + grace;
        assert!(reassign_from_disconnected(
            &mut prompts,
            &room.players,
            grace,
            later
        ));
        assert!(
            prompts
                .iter()
                .all(|p| p.assigned_player_id.as_deref() != Some(&gone))
        );
        // Total deck size is unchanged by reassignment.
        assert_eq!(prompts.len(), 6);
    }

    #[test]
    fn submitted_prompts_never_move() {
        let mut room = make_room(2);
        let template = template_definition("t-forest-mishap").unwrap();
        let mut prompts = deal(template, &room.players, 3, 0);
        let gone = room.players[0].id.clone();
        prompts[0].submitted = true;
        prompts[0].value = Some("brave".into());
        room.players[0].connected = false;
        room.players[0].disconnected_at = Some(Instant::now());

        let later = Instant::now() + Duration::from_secs(60);
        reassign_from_disconnected(&mut prompts, &room.players, Duration::from_secs(30), later);
        assert_eq!(prompts[0].assigned_player_id.as_deref(), Some(gone.as_str()));
    }

    #[test]
    fn reassignment_prefers_fewest_outstanding() {
        let mut room = make_room(3);
        let template = template_definition("t-forest-mishap").unwrap();
        let mut prompts = deal(template, &room.players, 2, 0);

        // Player 1 has submitted everything; player 2 still holds two.
        let light = room.players[0].id.clone();
        for prompt in prompts.iter_mut() {
            if prompt.assigned_player_id.as_deref() == Some(&light) {
                prompt.submitted = true;
                prompt.value = Some("done".into());
            }
        }
        room.players[2].connected = false;
        room.players[2].disconnected_at = Some(Instant::now());

        let later = Instant::now() + Duration::from_secs(60);
        reassign_from_disconnected(&mut prompts, &room.players, Duration::from_secs(30), later);

        // The idle player picks up the slack before the loaded one.
        let picked_up = prompts
            .iter()
            .filter(|p| !p.submitted && p.assigned_player_id.as_deref() == Some(&light))
            .count();
        assert!(picked_up >= 1);
    }

    #[test]
    fn removal_redistributes_immediately() {
        let mut room = make_room(3);
        let template = template_definition("t-forest-mishap").unwrap();
        let mut prompts = deal(template, &room.players, 2, 0);
        let removed = room.players.remove(1);

        assert!(redistribute_from_removed(
            &mut prompts,
            &removed.id,
            &room.players,
            Instant::now()
        ));
        assert!(
            prompts
                .iter()
                .all(|p| p.assigned_player_id.as_deref() != Some(&removed.id))
        );
    }

    #[test]
    fn removal_with_empty_room_unassigns() {
        let mut room = make_room(1);
        let template = template_definition("t-forest-mishap").unwrap();
        let mut prompts = deal(template, &room.players, 3, 0);
        let removed = room.players.remove(0);

        redistribute_from_removed(&mut prompts, &removed.id, &room.players, Instant::now());
        assert!(prompts.iter().all(|p| p.assigned_player_id.is_none()));
    }
}
