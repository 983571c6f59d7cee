//! Seeded synthetic referral network.
//!
//! The same seed always yields the same command stream, so a run can be
//! reproduced exactly against a fresh database.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use referral_core::command::LedgerCommand;

/// Share of referred users whose subscription becomes active.
const ELIGIBLE_RATE: f64 = 0.85;

/// Chance a new user is referred by one of the most recent joiners
/// rather than anyone in the network.
const RECENT_BIAS: f64 = 0.6;
const RECENT_WINDOW: usize = 16;

pub fn generate(seed: u64, users: u64) -> Vec<LedgerCommand> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let mut ids: Vec<String> = Vec::with_capacity(users as usize);
    let mut commands = Vec::new();

    let root = next_id(&mut rng);
    commands.push(LedgerCommand::Register { user_id: root.clone(), ancestor_id: None });
    commands.push(LedgerCommand::Eligible { user_id: root.clone() });
    ids.push(root);

    for _ in 1..users {
        let referrer = if rng.gen_bool(RECENT_BIAS) {
            let window = ids.len().min(RECENT_WINDOW);
            ids[ids.len() - 1 - rng.gen_range(0..window)].clone()
        } else {
            ids[rng.gen_range(0..ids.len())].clone()
        };
        let user = next_id(&mut rng);
        commands.push(LedgerCommand::Register {
            user_id:     user.clone(),
            ancestor_id: Some(referrer.clone()),
        });
        commands.push(LedgerCommand::Place {
            ancestor_id:   referrer,
            descendant_id: user.clone(),
        });
        if rng.gen_bool(ELIGIBLE_RATE) {
            commands.push(LedgerCommand::Eligible { user_id: user.clone() });
        }
        ids.push(user);
    }
    commands
}

fn next_id(rng: &mut Pcg64Mcg) -> String {
    uuid::Builder::from_random_bytes(rng.gen()).into_uuid().to_string()
}
