use log::warn;

use crate::net::{BeginWorldSync, Packet, RemoveLoadingScreen, RosterEntry};
use crate::world::{WorldError, WorldState};

use super::registry::Player;

/// Builds the packets a peer receives right after it reports ready.
///
/// The host already runs the live world, so it only gets its loading screen
/// removed. Everyone else gets the begin marker, the other ready players, the
/// world state and one packet per vehicle. `RemoveLoadingScreen` closes the
/// sequence even when some world state could not be read.
pub fn snapshot_sequence<'a>(
    world: &dyn WorldState,
    others: impl IntoIterator<Item = &'a Player>,
    is_host: bool,
) -> Vec<Packet> {
    if is_host {
        return vec![RemoveLoadingScreen.into()];
    }

    let mut packets = vec![Packet::from(BeginWorldSync)];

    for player in others {
        packets.push(
            RosterEntry {
                id: player.id,
                username: player.username.clone(),
                position: player.position.into(),
                rotation_y: player.rotation_y,
                is_jumping: player.is_jumping,
            }
            .into(),
        );
    }

    push_or_skip(&mut packets, "weather", world.weather());
    push_or_skip(&mut packets, "junctions", world.junctions());
    push_or_skip(&mut packets, "turntables", world.turntables());

    match world.vehicles() {
        Ok(vehicles) => packets.extend(vehicles.into_iter().map(Packet::from)),
        Err(e) => warn!("snapshot skipped vehicles: {e}"),
    }

    packets.push(RemoveLoadingScreen.into());
    packets
}

fn push_or_skip<P: Into<Packet>>(packets: &mut Vec<Packet>, what: &str, state: Result<P, WorldError>) {
    match state {
        Ok(state) => packets.push(state.into()),
        Err(e) => warn!("snapshot skipped {what}: {e}"),
    }
}
