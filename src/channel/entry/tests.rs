use super::*;
use crate::{
    canonical::types::{Destination, U256},
    channel::{AllocationItem, Outcome},
    sig::Signer,
};
use alloc::{string::ToString, vec};
use rand::{rngs::StdRng, SeedableRng};

struct Setup {
    signers: Vec<Signer>,
    constants: ChannelConstants,
}

fn setup(n: usize) -> Setup {
    let mut rng = StdRng::seed_from_u64(0);
    let signers: Vec<Signer> = (0..n).map(|_| Signer::new(&mut rng)).collect();
    let participants = signers
        .iter()
        .enumerate()
        .map(|(i, s)| Participant {
            participant_id: i.to_string(),
            signing_address: s.address(),
            destination: Destination::from(s.address()),
        })
        .collect();
    let constants = ChannelConstants {
        chain_id: U256::from(1),
        participants,
        app_definition: Address::default(),
        challenge_duration: 10,
        channel_nonce: U256::zero(),
    };
    Setup { signers, constants }
}

fn outcome(a: u64, b: u64) -> Outcome {
    Outcome::Allocation(vec![
        AllocationItem::new(Destination([1; 32]), a),
        AllocationItem::new(Destination([2; 32]), b),
    ])
}

fn vars(turn_num: u64, outcome: Outcome) -> StateVariables {
    StateVariables::new(turn_num, outcome)
}

fn sign(
    setup: &Setup,
    entry: &ChannelStoreEntry,
    v: &StateVariables,
    by: &[usize],
) -> Vec<SignatureEntry> {
    let hash = entry.state_hash(v).unwrap();
    by.iter()
        .map(|&i| SignatureEntry {
            signer: setup.signers[i].address(),
            signature: setup.signers[i].sign_eth(hash).unwrap(),
        })
        .collect()
}

// Turns 0 to 3, each signed by its mover only.
fn alternating(
    setup: &Setup,
    entry: &ChannelStoreEntry,
) -> Vec<(StateVariables, Vec<SignatureEntry>)> {
    (0..4)
        .map(|t| {
            let v = vars(t, outcome(5, 5));
            let sigs = sign(setup, entry, &v, &[(t % 2) as usize]);
            (v, sigs)
        })
        .collect()
}

#[test]
fn alternating_turns_support_the_latest() {
    let s = setup(2);
    let mut entry = ChannelStoreEntry::new(s.constants.clone(), 0).unwrap();
    for (v, sigs) in alternating(&s, &entry) {
        entry.add_state(v, sigs).unwrap();
    }

    assert_eq!(entry.supported().unwrap().turn_num, 3);
    assert_eq!(entry.support().len(), 2);
    assert_eq!(entry.status(), ChannelStatus::Running);
}

#[test]
fn stale_states_are_pruned() {
    let s = setup(2);
    let mut entry = ChannelStoreEntry::new(s.constants.clone(), 0).unwrap();
    for (v, sigs) in alternating(&s, &entry) {
        entry.add_state(v, sigs).unwrap();
    }

    assert!(entry.states_at(0).is_empty());
    assert!(entry.states_at(1).is_empty());
    assert_eq!(entry.states_at(2).len(), 1);
    assert_eq!(entry.all_signed_states().len(), 2);
}

#[test]
fn merge_is_idempotent() {
    let s = setup(2);
    let mut entry = ChannelStoreEntry::new(s.constants.clone(), 0).unwrap();
    let states = alternating(&s, &entry);
    for (v, sigs) in states.iter().cloned() {
        entry.add_state(v, sigs).unwrap();
    }
    let supported = entry.supported().cloned();

    for (v, sigs) in states {
        assert!(!entry.add_state(v, sigs).unwrap());
    }
    assert_eq!(entry.supported().cloned(), supported);
}

#[test]
fn merge_is_order_independent() {
    let s = setup(2);
    let template = ChannelStoreEntry::new(s.constants.clone(), 0).unwrap();
    let states = alternating(&s, &template);

    let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];
    let mut results = Vec::new();
    for order in orders {
        let mut entry = template.clone();
        for i in order {
            let (v, sigs) = states[i].clone();
            entry.add_state(v, sigs).unwrap();
        }
        results.push(entry.supported().cloned());
    }

    assert!(results[0].is_some());
    assert!(results.iter().all(|r| r == &results[0]));
}

#[test]
fn support_needs_every_participant() {
    let s = setup(3);
    let mut entry = ChannelStoreEntry::new(s.constants.clone(), 0).unwrap();
    let v = vars(0, outcome(1, 1));

    assert!(!entry.is_supported_by_me());
    entry.add_state(v.clone(), sign(&s, &entry, &v, &[0])).unwrap();
    assert!(!entry.is_supported());
    assert!(entry.is_supported_by_me());
    assert_eq!(entry.status(), ChannelStatus::Proposed);

    entry.add_state(v.clone(), sign(&s, &entry, &v, &[1])).unwrap();
    assert!(!entry.is_supported());

    entry.add_state(v.clone(), sign(&s, &entry, &v, &[2])).unwrap();
    assert_eq!(entry.supported(), Some(&v));
    assert_eq!(entry.status(), ChannelStatus::Opening);
}

#[test]
fn state_not_signed_by_mover_cannot_anchor_support() {
    let s = setup(2);
    let mut entry = ChannelStoreEntry::new(s.constants.clone(), 0).unwrap();
    // Turn 1 belongs to participant 1, a signature by participant 0 alone
    // does not count.
    let v = vars(1, outcome(1, 1));
    entry.add_state(v.clone(), sign(&s, &entry, &v, &[0])).unwrap();
    assert!(!entry.is_supported());

    entry.add_state(v.clone(), sign(&s, &entry, &v, &[1])).unwrap();
    assert_eq!(entry.supported(), Some(&v));
}

#[test]
fn invalid_transition_restarts_support() {
    let s = setup(2);
    let mut entry = ChannelStoreEntry::new(s.constants.clone(), 0).unwrap();
    let first = vars(0, outcome(5, 5));
    entry
        .add_state(first.clone(), sign(&s, &entry, &first, &[0, 1]))
        .unwrap();

    // Outcome changes during setup are not allowed.
    let second = vars(1, outcome(9, 1));
    entry
        .add_state(second.clone(), sign(&s, &entry, &second, &[1]))
        .unwrap();

    assert_eq!(entry.supported(), Some(&first));
}

#[test]
fn outsider_signature_is_rejected() {
    let s = setup(2);
    let outsider = Signer::new(&mut StdRng::seed_from_u64(99));
    let mut entry = ChannelStoreEntry::new(s.constants.clone(), 0).unwrap();
    let v = vars(0, outcome(1, 1));
    let hash = entry.state_hash(&v).unwrap();
    let sig = SignatureEntry {
        signer: outsider.address(),
        signature: outsider.sign_eth(hash).unwrap(),
    };

    assert_eq!(
        entry.add_state(v, [sig]),
        Err(EntryError::NotAParticipant(outsider.address()))
    );
    assert!(entry.latest().is_none());
}

#[test]
fn final_state_closes_the_channel() {
    let s = setup(2);
    let mut entry = ChannelStoreEntry::new(s.constants.clone(), 1).unwrap();
    for (v, sigs) in alternating(&s, &entry) {
        entry.add_state(v, sigs).unwrap();
    }

    let mut last = vars(4, outcome(5, 5));
    last.is_final = true;
    // Not signed by its mover yet.
    entry.add_state(last.clone(), sign(&s, &entry, &last, &[1])).unwrap();
    assert_eq!(entry.status(), ChannelStatus::Closing);
    assert!(!entry.is_finalized());

    entry.add_state(last.clone(), sign(&s, &entry, &last, &[0])).unwrap();
    assert_eq!(entry.status(), ChannelStatus::Closed);
    assert!(entry.is_finalized());
    assert_eq!(entry.latest_signed_by_me(), Some(&last));
}

#[test]
fn record_restores_the_same_entry() {
    let s = setup(2);
    let mut entry = ChannelStoreEntry::new(s.constants.clone(), 0).unwrap();
    for (v, sigs) in alternating(&s, &entry) {
        entry.add_state(v, sigs).unwrap();
    }
    entry.set_funding(Funding::Direct);
    entry.set_finalized_on_chain(3);

    let restored = ChannelStoreEntry::from_record(entry.record()).unwrap();
    assert_eq!(restored.supported(), entry.supported());
    assert_eq!(restored.funding(), Some(Funding::Direct));
    assert_eq!(restored.finalized_on_chain(), Some(3));
    assert_eq!(restored.channel_id(), entry.channel_id());
    assert_eq!(restored.record(), entry.record());
}

#[test]
fn pruning_drops_signatures_of_pruned_states() {
    let s = setup(2);
    let mut entry = ChannelStoreEntry::new(s.constants.clone(), 0).unwrap();
    let states = alternating(&s, &entry);
    for (v, sigs) in states.iter().cloned() {
        entry.add_state(v, sigs).unwrap();
    }
    assert_eq!(entry.signatures.len(), 2);
    assert!(entry.signatures.keys().all(|h| entry.states.contains_key(h)));

    // A late countersignature of a pruned turn is not kept either.
    let (v, _) = states[0].clone();
    let late = sign(&s, &entry, &v, &[1]);
    assert!(!entry.add_state(v, late).unwrap());
    assert_eq!(entry.signatures.len(), 2);
    assert_eq!(entry.record().states.len(), 2);
}

#[test]
fn transition_rules() {
    let a = vars(4, outcome(5, 5));
    let mut b = vars(5, outcome(2, 8));
    assert!(valid_transition(&a, &b, 2));
    assert!(!valid_transition(&a, &b, 3));

    b.is_final = true;
    assert!(!valid_transition(&a, &b, 2));
    assert!(!valid_transition(&a, &vars(6, outcome(5, 5)), 2));
}
