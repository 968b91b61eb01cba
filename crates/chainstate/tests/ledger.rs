use std::sync::Arc;

use votad_chainstate::ledger::{VoteLedger, VoteState};
use votad_primitives::block::{Block, BlockHeader};
use votad_primitives::transaction::{Transaction, TxKind, TxOutput};
use votad_primitives::{Hash256, NATIVE_ASSET};
use votad_storage::memory::MemoryStore;

fn header() -> BlockHeader {
    BlockHeader {
        version: 4,
        prev_hash: [0u8; 32],
        merkle_root: [0u8; 32],
        time: 1_700_000_000,
        bits: 0x1d00_ffff,
        nonce: 0,
    }
}

fn block(txs: Vec<Transaction>) -> Block {
    Block {
        header: header(),
        txs,
    }
}

fn txid(n: u8) -> Hash256 {
    [n; 32]
}

fn native(address: &str, value: i64) -> TxOutput {
    TxOutput {
        address: address.to_string(),
        value,
        asset: NATIVE_ASSET.to_string(),
    }
}

fn coinbase(address: &str, value: i64) -> Transaction {
    Transaction {
        txid: txid(0),
        kind: TxKind::Value,
        is_coinbase: true,
        sender: None,
        outputs: vec![native(address, value)],
        asset_type: None,
    }
}

fn vote(n: u8, sender: &str, target: &str) -> Transaction {
    Transaction {
        txid: txid(n),
        kind: TxKind::Vote,
        is_coinbase: false,
        sender: Some(sender.to_string()),
        outputs: vec![native(sender, 1), native(target, 1)],
        asset_type: None,
    }
}

fn enroll(n: u8, sender: &str) -> Transaction {
    Transaction {
        txid: txid(n),
        kind: TxKind::Enroll,
        is_coinbase: false,
        sender: Some(sender.to_string()),
        outputs: vec![native(sender, 1)],
        asset_type: None,
    }
}

fn transfer(n: u8, sender: &str, outputs: Vec<TxOutput>) -> Transaction {
    Transaction {
        txid: txid(n),
        kind: TxKind::Value,
        is_coinbase: false,
        sender: Some(sender.to_string()),
        outputs,
        asset_type: None,
    }
}

fn freeze(n: u8, sender: &str, asset: &str, pay_to: &str) -> Transaction {
    Transaction {
        txid: txid(n),
        kind: TxKind::FreezeAsset,
        is_coinbase: false,
        sender: Some(sender.to_string()),
        outputs: vec![native(pay_to, 1)],
        asset_type: Some(asset.to_string()),
    }
}

fn ledger() -> VoteLedger<Arc<MemoryStore>> {
    VoteLedger::new(Arc::new(MemoryStore::new()))
}

fn weight(ledger: &VoteLedger<Arc<MemoryStore>>, address: &str) -> i64 {
    ledger
        .tally(address)
        .unwrap()
        .and_then(|state| state.weight())
        .unwrap_or(0)
}

#[test]
fn coinbase_credits_the_first_output() {
    let ledger = ledger();
    ledger.apply_block(&block(vec![coinbase("miner", 5_000)])).unwrap();
    assert_eq!(ledger.balance("miner").unwrap(), 5_000);
    assert_eq!(weight(&ledger, "miner"), 5_000);
}

#[test]
fn vote_weight_splits_and_returns() {
    let ledger = ledger();
    ledger.apply_block(&block(vec![coinbase("a", 100)])).unwrap();

    // a votes for x: the full balance backs x.
    ledger.apply_block(&block(vec![vote(1, "a", "x")])).unwrap();
    assert_eq!(weight(&ledger, "x"), 100);
    assert_eq!(ledger.candidates_of("a").unwrap(), vec!["x"]);
    assert_eq!(ledger.voters_of("x").unwrap(), vec!["a"]);

    // a also votes for y: the balance splits evenly.
    ledger.apply_block(&block(vec![vote(2, "a", "y")])).unwrap();
    assert_eq!(weight(&ledger, "x"), 50);
    assert_eq!(weight(&ledger, "y"), 50);
    assert_eq!(weight(&ledger, "x") + weight(&ledger, "y"), 100);

    // a unvotes x: y regains the whole balance, x drops to zero.
    ledger.apply_block(&block(vec![vote(3, "a", "x")])).unwrap();
    assert_eq!(weight(&ledger, "x"), 0);
    assert_eq!(weight(&ledger, "y"), 100);
    assert_eq!(ledger.candidates_of("a").unwrap(), vec!["y"]);
    assert!(ledger.voters_of("x").unwrap().is_empty());
}

#[test]
fn unvoting_the_last_candidate_zeroes_it() {
    let ledger = ledger();
    ledger.apply_block(&block(vec![coinbase("a", 100)])).unwrap();
    ledger.apply_block(&block(vec![vote(1, "a", "x")])).unwrap();
    ledger.apply_block(&block(vec![vote(2, "a", "x")])).unwrap();
    assert_eq!(weight(&ledger, "x"), 0);
    assert!(ledger.candidates_of("a").unwrap().is_empty());
    assert!(ledger.voters_of("x").unwrap().is_empty());
}

#[test]
fn malformed_votes_are_skipped() {
    let ledger = ledger();
    ledger.apply_block(&block(vec![coinbase("a", 100)])).unwrap();

    // Three distinct output addresses.
    let mut bad = vote(1, "a", "x");
    bad.outputs.push(native("y", 1));
    // No output besides the sender's own.
    let mut self_only = vote(2, "a", "x");
    self_only.outputs = vec![native("a", 1)];
    // No sender.
    let mut senderless = vote(3, "a", "x");
    senderless.sender = None;

    ledger
        .apply_block(&block(vec![bad, self_only, senderless]))
        .unwrap();
    assert_eq!(ledger.tally("x").unwrap(), None);
    assert!(ledger.candidates_of("a").unwrap().is_empty());
}

#[test]
fn enrollment_toggles_between_candidate_and_retiring() {
    let ledger = ledger();
    ledger.apply_block(&block(vec![enroll(1, "b")])).unwrap();
    assert_eq!(ledger.tally("b").unwrap(), Some(VoteState::Candidate(0)));

    ledger.apply_block(&block(vec![coinbase("a", 100)])).unwrap();
    ledger.apply_block(&block(vec![vote(2, "a", "b")])).unwrap();
    assert_eq!(weight(&ledger, "b"), 100);

    // Retiring releases the backing voter and clears the voter list.
    ledger.apply_block(&block(vec![enroll(3, "b")])).unwrap();
    assert_eq!(ledger.tally("b").unwrap(), Some(VoteState::Retiring));
    assert!(ledger.candidates_of("a").unwrap().is_empty());
    assert!(ledger.voters_of("b").unwrap().is_empty());

    // Re-enrolling starts over at zero.
    ledger.apply_block(&block(vec![enroll(4, "b")])).unwrap();
    assert_eq!(ledger.tally("b").unwrap(), Some(VoteState::Candidate(0)));
}

#[test]
fn retiring_redistributes_remaining_votes() {
    let ledger = ledger();
    ledger.apply_block(&block(vec![coinbase("a", 100)])).unwrap();
    ledger
        .apply_block(&block(vec![vote(1, "a", "x"), vote(2, "a", "y")]))
        .unwrap();
    assert_eq!(weight(&ledger, "x"), 50);
    assert_eq!(weight(&ledger, "y"), 50);

    // x already carries weight, so it counts as an active candidate and a
    // single enroll retires it, pushing a's support fully onto y.
    ledger.apply_block(&block(vec![enroll(3, "x")])).unwrap();
    assert_eq!(ledger.tally("x").unwrap(), Some(VoteState::Retiring));
    assert_eq!(weight(&ledger, "y"), 100);
    assert_eq!(ledger.candidates_of("a").unwrap(), vec!["y"]);
}

#[test]
fn transfers_move_balance_and_weight() {
    let ledger = ledger();
    ledger.apply_block(&block(vec![coinbase("a", 100)])).unwrap();
    ledger
        .apply_block(&block(vec![vote(1, "a", "x"), vote(2, "a", "y")]))
        .unwrap();

    // a sends 30 to b; change back to a is ignored. The debit and the
    // recipient's credit are both split by the sender's candidate count.
    ledger
        .apply_block(&block(vec![transfer(
            3,
            "a",
            vec![native("b", 30), native("a", 70)],
        )]))
        .unwrap();
    assert_eq!(ledger.balance("a").unwrap(), 70);
    assert_eq!(ledger.balance("b").unwrap(), 30);
    assert_eq!(weight(&ledger, "x"), 35);
    assert_eq!(weight(&ledger, "y"), 35);
    assert_eq!(weight(&ledger, "b"), 15);
}

#[test]
fn transfer_without_candidates_moves_only_balances() {
    let ledger = ledger();
    ledger.apply_block(&block(vec![coinbase("a", 100)])).unwrap();
    ledger
        .apply_block(&block(vec![transfer(1, "a", vec![native("b", 40)])]))
        .unwrap();
    assert_eq!(ledger.balance("a").unwrap(), 60);
    assert_eq!(ledger.balance("b").unwrap(), 40);
    assert_eq!(ledger.tally("b").unwrap(), None);
}

#[test]
fn non_native_outputs_do_not_move_balance() {
    let ledger = ledger();
    ledger.apply_block(&block(vec![coinbase("a", 100)])).unwrap();
    let mut tx = transfer(1, "a", vec![native("b", 40)]);
    tx.outputs[0].asset = "GOLD".to_string();
    ledger.apply_block(&block(vec![tx])).unwrap();
    assert_eq!(ledger.balance("a").unwrap(), 100);
    assert_eq!(ledger.balance("b").unwrap(), 0);
}

#[test]
fn first_freeze_creates_the_record_unfrozen() {
    let ledger = ledger();
    assert!(!ledger.is_frozen("GOLD").unwrap());

    // No record exists yet, so even an output paying the asset's own type
    // address cannot flip; the record is created unfrozen.
    ledger
        .apply_block(&block(vec![freeze(1, "a", "GOLD", "GOLD")]))
        .unwrap();
    assert!(!ledger.is_frozen("GOLD").unwrap());
}

#[test]
fn freeze_flips_only_on_a_matching_output() {
    let ledger = ledger();
    // Establish the record first; this one cannot flip.
    ledger
        .apply_block(&block(vec![freeze(1, "a", "GOLD", "b")]))
        .unwrap();
    assert!(!ledger.is_frozen("GOLD").unwrap());

    // Record exists and an output pays the asset's own type address: flip.
    ledger
        .apply_block(&block(vec![freeze(2, "a", "GOLD", "GOLD")]))
        .unwrap();
    assert!(ledger.is_frozen("GOLD").unwrap());

    // No matching output: the current value is rewritten unchanged.
    ledger
        .apply_block(&block(vec![freeze(3, "a", "GOLD", "b")]))
        .unwrap();
    assert!(ledger.is_frozen("GOLD").unwrap());

    ledger
        .apply_block(&block(vec![freeze(4, "a", "GOLD", "GOLD")]))
        .unwrap();
    assert!(!ledger.is_frozen("GOLD").unwrap());
}

#[test]
fn one_block_commits_atomically_in_order() {
    // Funding, voting and spending inside one block behave as if applied
    // sequentially.
    let ledger = ledger();
    ledger
        .apply_block(&block(vec![
            coinbase("a", 100),
            vote(1, "a", "x"),
            transfer(2, "a", vec![native("b", 50)]),
        ]))
        .unwrap();
    assert_eq!(ledger.balance("a").unwrap(), 50);
    assert_eq!(ledger.balance("b").unwrap(), 50);
    // x got the full 100 at vote time, then lost the transferred share.
    assert_eq!(weight(&ledger, "x"), 50);
    assert_eq!(weight(&ledger, "b"), 50);
}
