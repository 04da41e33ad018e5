use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1};
use walletd_chainstate::{ChainView, HeaderOracle, Position, TrustedHeaders};
use walletd_consensus::money::Amount;
use walletd_consensus::params::{chain_params, ChainParams, Network};
use walletd_primitives::address::script_pubkey_to_address;
use walletd_primitives::block::{genesis_header, BlockHeader};
use walletd_primitives::script::{op_return_script, p2pkh_script};
use walletd_primitives::{OutPoint, Transaction};
use walletd_storage::memory::MemoryStore;
use walletd_wallet::sighash::signature_hash;
use walletd_wallet::{
    BroadcastError, Broadcaster, FeePolicy, LocalKeys, Proposal, ProposalError, Proposals,
    Recipient, SendResult, SpendPolicy, SubaccountId, Subchain, TxBuilder, TxoState, UtxoLedger,
    WalletLedger, WalletOutput,
};

const ACCOUNT: SubaccountId = SubaccountId(0);
const LIFETIME: Duration = Duration::from_secs(600);

#[derive(Default)]
struct Wire {
    sent: Mutex<Vec<Transaction>>,
    fail: AtomicBool,
}

impl Broadcaster for Wire {
    fn broadcast(&self, tx: &Transaction, raw: &[u8]) -> Result<(), BroadcastError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BroadcastError("peer went away".to_string()));
        }
        assert_eq!(tx.consensus_encode().expect("encode"), raw);
        self.sent.lock().expect("sent").push(tx.clone());
        Ok(())
    }
}

impl Wire {
    fn count(&self) -> usize {
        self.sent.lock().expect("sent").len()
    }
}

struct Harness {
    params: ChainParams,
    chain: Vec<BlockHeader>,
    ledger: Arc<WalletLedger<MemoryStore>>,
    keys: Arc<LocalKeys>,
    wire: Arc<Wire>,
    funding_script: Vec<u8>,
    proposals: Proposals,
}

fn params() -> ChainParams {
    chain_params(Network::Regtest)
}

fn headers(len: usize) -> Vec<BlockHeader> {
    let genesis = genesis_header(&params());
    let mut out: Vec<BlockHeader> = Vec::with_capacity(len);
    for _ in 0..len {
        let prev = out.last().unwrap_or(&genesis).clone();
        out.push(BlockHeader {
            version: 4,
            prev_block: prev.hash(),
            merkle_root: [0u8; 32],
            time: prev.time + 60,
            bits: 0x207f_ffff,
            nonce: 0,
        });
    }
    out
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(
        HeaderOracle::open(Arc::clone(&store), params(), Arc::new(TrustedHeaders))
            .expect("oracle"),
    );
    let chain = headers(10);
    oracle.add_headers(&chain).expect("headers");
    assert_eq!(oracle.best_chain().height, 10);

    let ledger = Arc::new(WalletLedger::open(Arc::clone(&store)).expect("ledger"));
    let keys = Arc::new(LocalKeys::new());
    keys.add_sender("alice").expect("sender");
    let funding = keys.generate_key().expect("funding key");
    let change = keys.generate_key().expect("change key");
    keys.set_change_key(ACCOUNT, change).expect("change");
    let funding_script = keys.script_for(&funding).expect("script");

    let wire = Arc::new(Wire::default());
    let view: Arc<dyn ChainView> = oracle;
    let builder = TxBuilder::new(
        params(),
        FeePolicy::new(1_000, 1_000),
        view,
        Arc::clone(&ledger) as Arc<dyn UtxoLedger>,
        Arc::clone(&keys) as Arc<dyn walletd_wallet::SigningService>,
        Arc::clone(&wire) as Arc<dyn Broadcaster>,
    );
    Harness {
        params: params(),
        chain,
        ledger,
        keys,
        wire,
        funding_script,
        proposals: Proposals::new(Arc::new(builder)),
    }
}

impl Harness {
    fn block(&self, height: i64) -> Position {
        Position::new(height, self.chain[(height - 1) as usize].hash())
    }

    fn fund(&self, tag: u8, value: Amount, mined: Option<i64>) -> OutPoint {
        self.fund_account(ACCOUNT, tag, value, mined)
    }

    fn fund_account(
        &self,
        subaccount: SubaccountId,
        tag: u8,
        value: Amount,
        mined: Option<i64>,
    ) -> OutPoint {
        let outpoint = OutPoint::new([tag; 32], 0);
        let mut output = WalletOutput::unconfirmed(
            outpoint,
            value,
            self.funding_script.clone(),
            subaccount,
            Subchain::External,
        );
        if let Some(height) = mined {
            output = output.confirmed(self.block(height));
        }
        self.ledger.insert(output).expect("insert");
        outpoint
    }

    fn address(&self, tag: u8) -> String {
        script_pubkey_to_address(&p2pkh_script(&[tag; 20]), &self.params).expect("address")
    }

    fn pay(&self, amount: Amount) -> Proposal {
        Proposal::new(
            "alice",
            ACCOUNT,
            vec![Recipient::new(self.address(0x42), amount)],
            LIFETIME,
        )
    }

    fn send(&self, proposal: Proposal) -> SendResult {
        let handle = self.proposals.add(proposal).expect("add");
        assert!(!self.proposals.run());
        handle.check().expect("resolved")
    }

    fn state(&self, outpoint: &OutPoint) -> Option<TxoState> {
        self.ledger
            .get(outpoint)
            .expect("get")
            .map(|output| output.state)
    }
}

fn sent(result: SendResult) -> Transaction {
    match result {
        SendResult::Sent(tx) => tx,
        other => panic!("expected a sent transaction, got {other}"),
    }
}

/// Splits a P2PKH scriptSig into its two pushes.
fn pushes(script_sig: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let sig_len = script_sig[0] as usize;
    let signature = script_sig[1..1 + sig_len].to_vec();
    let key_len = script_sig[1 + sig_len] as usize;
    let pubkey = script_sig[2 + sig_len..2 + sig_len + key_len].to_vec();
    assert_eq!(script_sig.len(), 2 + sig_len + key_len);
    (signature, pubkey)
}

#[test]
fn payment_with_change_is_signed_reserved_and_broadcast() {
    let h = harness();
    let input = h.fund(1, 100_000, Some(2));

    let tx = sent(h.send(h.pay(30_000)));
    assert_eq!(tx.vin.len(), 1);
    assert_eq!(tx.vin[0].prevout, input);
    assert_eq!(tx.vout.len(), 2);
    assert_eq!(tx.vout[0].value, 30_000);
    assert_eq!(tx.vout[0].script_pubkey, p2pkh_script(&[0x42; 20]));
    assert_eq!(tx.vout[1].value, 100_000 - 30_000 - 226);
    assert_eq!(h.wire.count(), 1);
    assert_eq!(h.state(&input), Some(TxoState::UnconfirmedSpend));

    let (signature, pubkey) = pushes(&tx.vin[0].script_sig);
    assert_eq!(signature.last(), Some(&0x01));
    let digest = signature_hash(&tx, 0, &h.funding_script).expect("sighash");
    let secp = Secp256k1::verification_only();
    let signature = Signature::from_der(&signature[..signature.len() - 1]).expect("der");
    let pubkey = PublicKey::from_slice(&pubkey).expect("pubkey");
    secp.verify_ecdsa(&Message::from_digest(digest), &signature, &pubkey)
        .expect("signature verifies");
    assert!(h.keys.key_count() >= 2);
}

#[test]
fn unconfirmed_funds_are_reported_separately() {
    let h = harness();
    h.fund(1, 10_000, Some(3));
    h.fund(2, 50_000, None);

    assert_eq!(h.send(h.pay(30_000)), SendResult::InsufficientConfirmedFunds);
    assert_eq!(h.send(h.pay(100_000)), SendResult::InsufficientFunds);
    assert_eq!(h.wire.count(), 0);
}

#[test]
fn fee_that_only_unconfirmed_funds_cover_is_insufficient_confirmed() {
    let h = harness();
    h.fund(1, 30_100, Some(3));
    h.fund(2, 50_000, None);

    assert_eq!(h.send(h.pay(30_000)), SendResult::InsufficientConfirmedFunds);
}

#[test]
fn immature_coinbase_counts_toward_neither_total() {
    let h = harness();
    let reward = WalletOutput::unconfirmed(
        OutPoint::new([9; 32], 0),
        5_000_000,
        h.funding_script.clone(),
        ACCOUNT,
        Subchain::External,
    )
    .confirmed(h.block(5))
    .coinbase();
    h.ledger.insert(reward).expect("insert");

    assert_eq!(h.send(h.pay(30_000)), SendResult::InsufficientFunds);
}

#[test]
fn malformed_proposals_are_rejected_before_selection() {
    let h = harness();
    let input = h.fund(1, 100_000, Some(2));

    let stranger = Proposal::new(
        "mallory",
        ACCOUNT,
        vec![Recipient::new(h.address(1), 30_000)],
        LIFETIME,
    );
    assert_eq!(h.send(stranger), SendResult::InvalidSenderNym);

    let empty = Proposal::new("alice", ACCOUNT, Vec::new(), LIFETIME);
    assert_eq!(h.send(empty), SendResult::MissingRecipients);

    let mainnet = script_pubkey_to_address(
        &p2pkh_script(&[1; 20]),
        &chain_params(Network::Mainnet),
    )
    .expect("address");
    let foreign = Proposal::new(
        "alice",
        ACCOUNT,
        vec![Recipient::new(mainnet, 30_000)],
        LIFETIME,
    );
    assert_eq!(h.send(foreign), SendResult::AddressNotValidForChain);

    let garbage = Proposal::new(
        "alice",
        ACCOUNT,
        vec![Recipient::new("notanaddress", 30_000)],
        LIFETIME,
    );
    assert_eq!(h.send(garbage), SendResult::OutputCreationError);
    assert_eq!(h.send(h.pay(100)), SendResult::OutputCreationError);

    let oversized = h.pay(30_000).with_notification(vec![7; 81]);
    assert_eq!(h.send(oversized), SendResult::OutputCreationError);

    assert_eq!(h.wire.count(), 0);
    assert_eq!(h.state(&input), Some(TxoState::ConfirmedNew));
}

#[test]
fn notifications_ride_in_data_carrier_outputs() {
    let h = harness();
    h.fund(1, 100_000, Some(2));

    let payload = vec![0x5c; 40];
    let tx = sent(h.send(h.pay(30_000).with_notification(payload.clone())));
    assert_eq!(tx.vout.len(), 3);
    assert_eq!(tx.vout[1].value, 0);
    assert_eq!(tx.vout[1].script_pubkey, op_return_script(&payload));
}

#[test]
fn missing_change_key_fails_without_reserving() {
    let h = harness();
    let other = SubaccountId(7);
    let input = h.fund_account(other, 1, 100_000, Some(2));

    let proposal = Proposal::new(
        "alice",
        other,
        vec![Recipient::new(h.address(0x42), 30_000)],
        LIFETIME,
    );
    assert_eq!(h.send(proposal), SendResult::ChangeError);
    assert_eq!(h.state(&input), Some(TxoState::ConfirmedNew));
}

#[test]
fn failed_broadcast_releases_the_reservation() {
    let h = harness();
    let input = h.fund(1, 100_000, Some(2));
    h.wire.fail.store(true, Ordering::SeqCst);

    assert_eq!(h.send(h.pay(30_000)), SendResult::SendFailed);
    assert_eq!(h.state(&input), Some(TxoState::ConfirmedNew));

    h.wire.fail.store(false, Ordering::SeqCst);
    assert!(h.send(h.pay(30_000)).is_sent());
}

#[test]
fn fee_rate_override_applies_to_one_proposal() {
    let h = harness();
    h.fund(1, 100_000, Some(2));

    let proposal = h.pay(30_000).with_policy(SpendPolicy {
        fee_per_kb: Some(5_000),
        ..SpendPolicy::default()
    });
    let tx = sent(h.send(proposal));
    assert_eq!(tx.vout[1].value, 100_000 - 30_000 - 1_130);
}

#[test]
fn required_inputs_are_spent_or_reported() {
    let h = harness();
    let big = h.fund(1, 900_000, Some(2));
    let small = h.fund(2, 40_000, Some(2));
    let pending = h.fund(3, 40_000, None);

    let forced = h.pay(30_000).with_policy(SpendPolicy {
        required_inputs: vec![small],
        ..SpendPolicy::default()
    });
    let tx = sent(h.send(forced));
    assert_eq!(tx.vin.len(), 1);
    assert_eq!(tx.vin[0].prevout, small);
    assert_eq!(h.state(&big), Some(TxoState::ConfirmedNew));

    let unconfirmed = h.pay(30_000).with_policy(SpendPolicy {
        required_inputs: vec![pending],
        ..SpendPolicy::default()
    });
    assert_eq!(h.send(unconfirmed), SendResult::InsufficientConfirmedFunds);

    let unknown = h.pay(30_000).with_policy(SpendPolicy {
        required_inputs: vec![OutPoint::new([0xaa; 32], 3)],
        ..SpendPolicy::default()
    });
    assert_eq!(h.send(unknown), SendResult::InsufficientFunds);
}

#[test]
fn sweep_spends_everything_to_one_recipient() {
    let h = harness();
    let a = h.fund(1, 40_000, Some(2));
    let b = h.fund(2, 60_000, Some(3));

    let sweep = SpendPolicy {
        sweep: true,
        ..SpendPolicy::default()
    };
    let tx = sent(h.send(h.pay(0).with_policy(sweep.clone())));
    assert_eq!(tx.vin.len(), 2);
    assert_eq!(tx.vin[0].prevout, b);
    assert_eq!(tx.vin[1].prevout, a);
    assert_eq!(tx.vout.len(), 1);
    assert_eq!(tx.vout[0].value, 100_000 - 340);

    let two = Proposal::new(
        "alice",
        ACCOUNT,
        vec![Recipient::new(h.address(1), 0), Recipient::new(h.address(2), 0)],
        LIFETIME,
    )
    .with_policy(sweep);
    assert_eq!(h.send(two), SendResult::OutputCreationError);
}

#[test]
fn sweep_that_cannot_cover_its_fee_is_invalid() {
    let h = harness();
    h.fund(1, 500, Some(2));

    let proposal = h.pay(0).with_policy(SpendPolicy {
        sweep: true,
        ..SpendPolicy::default()
    });
    assert_eq!(h.send(proposal), SendResult::InvalidSweep);
}

#[test]
fn duplicate_ids_are_refused() {
    let h = harness();
    let proposal = h.pay(30_000);
    let copy = proposal.clone();
    let _handle = h.proposals.add(proposal).expect("add");
    assert_eq!(
        h.proposals.add(copy.clone()).err(),
        Some(ProposalError::DuplicateProposal(copy.id))
    );
    assert_eq!(h.proposals.pending(), 1);
}

#[test]
fn expired_proposals_are_never_built() {
    let h = harness();
    h.fund(1, 100_000, Some(2));

    let proposal = Proposal::new(
        "alice",
        ACCOUNT,
        vec![Recipient::new(h.address(0x42), 30_000)],
        Duration::ZERO,
    );
    let id = proposal.id;
    let handle = h.proposals.add(proposal).expect("add");
    assert_eq!(h.proposals.is_expired(&id), Some(true));
    assert!(!h.proposals.run());
    assert_eq!(handle.check(), Some(SendResult::Expired));
    assert_eq!(h.proposals.check(&id), Some(SendResult::Expired));
    assert_eq!(h.wire.count(), 0);
}

#[test]
fn cancel_only_affects_pending_proposals() {
    let h = harness();
    h.fund(1, 100_000, Some(2));

    let proposal = h.pay(30_000);
    let id = proposal.id;
    let handle = h.proposals.add(proposal).expect("add");
    assert_eq!(h.proposals.check(&id), None);
    assert!(h.proposals.cancel(&id));
    assert!(!h.proposals.cancel(&id));
    assert_eq!(handle.wait(Duration::from_secs(1)), Some(SendResult::Cancelled));

    assert!(!h.proposals.run());
    assert_eq!(h.wire.count(), 0);
    assert_eq!(h.proposals.is_expired(&id), Some(false));
}

#[test]
fn competing_proposals_never_spend_the_same_output() {
    let h = harness();
    let only = h.fund(1, 100_000, Some(2));

    let handles: Vec<_> = (0..4)
        .map(|_| h.proposals.add(h.pay(30_000)).expect("add"))
        .collect();
    assert_eq!(h.proposals.pending(), 4);
    assert!(!h.proposals.run());

    let results: Vec<SendResult> = handles
        .iter()
        .map(|handle| handle.check().expect("resolved"))
        .collect();
    assert_eq!(results.iter().filter(|result| result.is_sent()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|result| **result == SendResult::InsufficientFunds)
            .count(),
        3
    );
    assert_eq!(h.wire.count(), 1);
    assert_eq!(h.state(&only), Some(TxoState::UnconfirmedSpend));
}

#[test]
fn proposals_added_during_a_run_wait_for_the_next_one() {
    let h = harness();
    h.fund(1, 100_000, Some(2));
    h.fund(2, 100_000, Some(2));

    let first = h.proposals.add(h.pay(30_000)).expect("add");
    assert!(!h.proposals.run());
    let second = h.proposals.add(h.pay(30_000)).expect("add");
    assert_eq!(second.check(), None);
    assert!(!h.proposals.run());

    assert!(first.check().expect("first").is_sent());
    assert!(second.check().expect("second").is_sent());
    assert_eq!(h.wire.count(), 2);
}

#[test]
fn resolved_proposals_can_be_taken_or_pruned() {
    let h = harness();
    h.fund(1, 100_000, Some(2));

    let sent = h.pay(30_000);
    let sent_id = sent.id;
    let cancelled = h.pay(30_000);
    let cancelled_id = cancelled.id;
    let waiting = h.pay(30_000);
    let waiting_id = waiting.id;
    let _sent = h.proposals.add(sent).expect("add");
    let _cancelled = h.proposals.add(cancelled).expect("add");
    assert!(h.proposals.cancel(&cancelled_id));
    assert!(!h.proposals.run());
    let _waiting = h.proposals.add(waiting.clone()).expect("add");
    assert_eq!(h.proposals.len(), 3);

    assert_eq!(h.proposals.take(&waiting_id), None);
    assert!(h.proposals.take(&sent_id).expect("sent").is_sent());
    assert_eq!(h.proposals.take(&sent_id), None);
    assert_eq!(h.proposals.check(&sent_id), None);
    assert_eq!(h.proposals.is_expired(&sent_id), None);

    assert_eq!(h.proposals.prune(), 1);
    assert_eq!(h.proposals.check(&cancelled_id), None);
    assert_eq!(h.proposals.len(), 1);
    assert_eq!(h.proposals.pending(), 1);
    assert_eq!(h.proposals.prune(), 0);
    assert_eq!(
        h.proposals.add(waiting).err(),
        Some(ProposalError::DuplicateProposal(waiting_id))
    );
}
