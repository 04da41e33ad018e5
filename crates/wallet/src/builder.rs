//! Coin selection, fee calculation, signing and reservation for one
//! proposal build attempt.

use std::cmp::Ordering;
use std::sync::Arc;

use walletd_chainstate::ChainView;
use walletd_consensus::constants::{MAX_OP_RETURN_RELAY, MAX_STANDARD_TX_SIZE};
use walletd_consensus::money::{money_range, Amount};
use walletd_consensus::{hash256_to_hex, ChainParams};
use walletd_primitives::encoding::varint_len;
use walletd_primitives::script::{op_return_script, p2pkh_script, push_data};
use walletd_primitives::{
    address_to_script_pubkey, AddressError, OutPoint, Transaction, TxIn, TxOut,
};

use crate::fees::{output_size, FeePolicy, P2PKH_INPUT_SIZE};
use crate::ledger::{OutputFilter, TxoState, UtxoLedger, WalletOutput};
use crate::proposal::{Proposal, SendResult};
use crate::sighash::signature_hash;
use crate::signing::{SignError, SigningService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastError(pub String);

impl std::fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "broadcast failed: {}", self.0)
    }
}

impl std::error::Error for BroadcastError {}

/// Hands a finished transaction to the network transport.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, tx: &Transaction, raw: &[u8]) -> Result<(), BroadcastError>;
}

/// Inputs chosen for a spend and how their surplus is split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<WalletOutput>,
    pub fee: Amount,
    /// Zero when no change output is created.
    pub change: Amount,
}

impl Selection {
    pub fn total(&self) -> Amount {
        self.inputs.iter().map(|output| output.value).sum()
    }
}

pub struct SelectionRequest<'a> {
    pub spendable: &'a [WalletOutput],
    /// Spent first, in this order.
    pub required: &'a [OutPoint],
    pub target: Amount,
    /// Payment and data-carrier outputs, without change.
    pub outputs: &'a [TxOut],
    pub fees: FeePolicy,
}

/// What the builder needs from a transaction format.
pub trait SpendModel: Send + Sync {
    /// Deterministic for a given request; `None` when the outputs cannot
    /// pay for `target` plus fee.
    fn select_inputs(&self, request: &SelectionRequest<'_>) -> Option<Selection>;

    fn estimate_size(&self, inputs: usize, outputs: &[TxOut]) -> usize;

    fn sign(
        &self,
        tx: &mut Transaction,
        inputs: &[WalletOutput],
        signer: &dyn SigningService,
    ) -> Result<(), SignError>;
}

/// P2PKH spends with legacy signatures. Selection is largest-first with
/// ties broken by outpoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransparentSpend;

impl TransparentSpend {
    fn change_placeholder() -> Vec<u8> {
        p2pkh_script(&[0u8; 20])
    }

    fn settle(
        &self,
        inputs: &[WalletOutput],
        request: &SelectionRequest<'_>,
    ) -> Option<Selection> {
        let total: Amount = inputs.iter().map(|output| output.value).sum();
        let placeholder = Self::change_placeholder();

        let mut with_change = request.outputs.to_vec();
        with_change.push(TxOut {
            value: 0,
            script_pubkey: placeholder.clone(),
        });
        let fee = request
            .fees
            .fee_for_size(self.estimate_size(inputs.len(), &with_change));
        let surplus = total - request.target - fee;
        if surplus >= 0 && !request.fees.is_dust(surplus, &placeholder) {
            return Some(Selection {
                inputs: inputs.to_vec(),
                fee,
                change: surplus,
            });
        }

        let fee = request
            .fees
            .fee_for_size(self.estimate_size(inputs.len(), request.outputs));
        if total - request.target >= fee {
            return Some(Selection {
                inputs: inputs.to_vec(),
                fee: total - request.target,
                change: 0,
            });
        }
        None
    }
}

impl SpendModel for TransparentSpend {
    fn select_inputs(&self, request: &SelectionRequest<'_>) -> Option<Selection> {
        let mut selected = Vec::with_capacity(request.required.len());
        for outpoint in request.required {
            let output = request
                .spendable
                .iter()
                .find(|output| output.outpoint == *outpoint)?;
            selected.push(output.clone());
        }

        let mut rest: Vec<&WalletOutput> = request
            .spendable
            .iter()
            .filter(|output| !request.required.contains(&output.outpoint))
            .collect();
        rest.sort_by(|a, b| compare_largest_first(a, b));

        if !selected.is_empty() {
            if let Some(selection) = self.settle(&selected, request) {
                return Some(selection);
            }
        }
        for output in rest {
            selected.push(output.clone());
            if let Some(selection) = self.settle(&selected, request) {
                return Some(selection);
            }
        }
        None
    }

    fn estimate_size(&self, inputs: usize, outputs: &[TxOut]) -> usize {
        let outputs_size: usize = outputs
            .iter()
            .map(|output| output_size(&output.script_pubkey))
            .sum();
        4 + varint_len(inputs as u64)
            + inputs * P2PKH_INPUT_SIZE
            + varint_len(outputs.len() as u64)
            + outputs_size
            + 4
    }

    fn sign(
        &self,
        tx: &mut Transaction,
        inputs: &[WalletOutput],
        signer: &dyn SigningService,
    ) -> Result<(), SignError> {
        let mut script_sigs = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let digest = signature_hash(tx, index, &input.script_pubkey)?;
            let signed = signer.sign_digest(&input.script_pubkey, &digest)?;
            let mut script_sig =
                Vec::with_capacity(signed.signature.len() + signed.pubkey.len() + 2);
            push_data(&mut script_sig, &signed.signature);
            push_data(&mut script_sig, &signed.pubkey);
            script_sigs.push(script_sig);
        }
        for (input, script_sig) in tx.vin.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }
        Ok(())
    }
}

fn compare_largest_first(a: &WalletOutput, b: &WalletOutput) -> Ordering {
    b.value
        .cmp(&a.value)
        .then_with(|| a.outpoint.cmp(&b.outpoint))
}

enum Attempt {
    Done(SendResult),
    LostRace,
}

/// Builds, signs, reserves and broadcasts a proposal against the ledger.
pub struct TxBuilder {
    params: ChainParams,
    fees: FeePolicy,
    selection_retries: usize,
    view: Arc<dyn ChainView>,
    ledger: Arc<dyn UtxoLedger>,
    signer: Arc<dyn SigningService>,
    broadcaster: Arc<dyn Broadcaster>,
    model: Arc<dyn SpendModel>,
}

impl TxBuilder {
    pub fn new(
        params: ChainParams,
        fees: FeePolicy,
        view: Arc<dyn ChainView>,
        ledger: Arc<dyn UtxoLedger>,
        signer: Arc<dyn SigningService>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            params,
            fees,
            selection_retries: 3,
            view,
            ledger,
            signer,
            broadcaster,
            model: Arc::new(TransparentSpend),
        }
    }

    pub fn with_selection_retries(mut self, retries: usize) -> Self {
        self.selection_retries = retries;
        self
    }

    pub fn with_spend_model(mut self, model: Arc<dyn SpendModel>) -> Self {
        self.model = model;
        self
    }

    pub fn fees(&self) -> FeePolicy {
        self.fees
    }

    /// Runs one build attempt to a terminal result. A lost reservation race
    /// reselects from a fresh ledger snapshot a bounded number of times.
    pub fn build(&self, proposal: &Proposal) -> SendResult {
        if !self.signer.resolve_sender(&proposal.sender) {
            return SendResult::InvalidSenderNym;
        }
        if proposal.recipients.is_empty() {
            return SendResult::MissingRecipients;
        }
        let payments = match self.payment_outputs(proposal) {
            Ok(payments) => payments,
            Err(result) => return result,
        };
        let fees = proposal
            .policy
            .fee_per_kb
            .map_or(self.fees, |rate| self.fees.with_rate(rate));

        for attempt in 0..=self.selection_retries {
            match self.attempt(proposal, &payments, fees) {
                Attempt::Done(result) => return result,
                Attempt::LostRace => walletd_log::log_debug!(
                    "proposal {} lost an input reservation race (attempt {})",
                    proposal.id,
                    attempt + 1
                ),
            }
        }
        walletd_log::log_warn!(
            "proposal {} could not reserve inputs after {} attempt(s)",
            proposal.id,
            self.selection_retries + 1
        );
        SendResult::InsufficientFunds
    }

    /// Recipient outputs followed by data-carrier outputs. A sweep's single
    /// payment carries a zero value until the inputs are known.
    fn payment_outputs(&self, proposal: &Proposal) -> Result<Vec<TxOut>, SendResult> {
        if proposal.policy.sweep && proposal.recipients.len() != 1 {
            return Err(SendResult::OutputCreationError);
        }
        let mut outputs =
            Vec::with_capacity(proposal.recipients.len() + proposal.notifications.len());
        for recipient in &proposal.recipients {
            let script_pubkey = match address_to_script_pubkey(&recipient.address, &self.params) {
                Ok(script) => script,
                Err(AddressError::UnknownPrefix) => {
                    return Err(SendResult::AddressNotValidForChain)
                }
                Err(_) => return Err(SendResult::OutputCreationError),
            };
            if proposal.policy.sweep {
                outputs.push(TxOut {
                    value: 0,
                    script_pubkey,
                });
                continue;
            }
            if recipient.amount <= 0
                || !money_range(recipient.amount)
                || self.fees.is_dust(recipient.amount, &script_pubkey)
            {
                return Err(SendResult::OutputCreationError);
            }
            outputs.push(TxOut {
                value: recipient.amount,
                script_pubkey,
            });
        }
        for payload in &proposal.notifications {
            if payload.len() > MAX_OP_RETURN_RELAY {
                return Err(SendResult::OutputCreationError);
            }
            outputs.push(TxOut {
                value: 0,
                script_pubkey: op_return_script(payload),
            });
        }
        Ok(outputs)
    }

    fn attempt(&self, proposal: &Proposal, payments: &[TxOut], fees: FeePolicy) -> Attempt {
        let tip = self.view.best_chain().height;
        let maturity = i64::from(self.params.coinbase_maturity);
        let filter = OutputFilter::all().with_maturity(tip, maturity);
        let owned = match self.ledger.query(proposal.subaccount, None, &filter) {
            Ok(owned) => owned,
            Err(err) => {
                walletd_log::log_error!("proposal {} ledger query failed: {}", proposal.id, err);
                return Attempt::Done(SendResult::DatabaseError);
            }
        };
        let (spendable, unconfirmed): (Vec<WalletOutput>, Vec<WalletOutput>) = owned
            .into_iter()
            .filter(|output| {
                matches!(output.state, TxoState::ConfirmedNew | TxoState::UnconfirmedNew)
            })
            .partition(|output| output.state == TxoState::ConfirmedNew);
        let confirmed_total: Amount = spendable.iter().map(|output| output.value).sum();
        let inclusive_total: Amount =
            confirmed_total + unconfirmed.iter().map(|output| output.value).sum::<Amount>();

        for outpoint in &proposal.policy.required_inputs {
            if !spendable.iter().any(|output| output.outpoint == *outpoint) {
                let pending = unconfirmed.iter().any(|output| output.outpoint == *outpoint);
                return Attempt::Done(if pending {
                    SendResult::InsufficientConfirmedFunds
                } else {
                    SendResult::InsufficientFunds
                });
            }
        }

        let mut outputs = payments.to_vec();
        let selection = if proposal.policy.sweep {
            match self.sweep(&spendable, &mut outputs, fees, inclusive_total > 0) {
                Ok(selection) => selection,
                Err(result) => return Attempt::Done(result),
            }
        } else {
            let Some(target) = proposal.target() else {
                return Attempt::Done(SendResult::OutputCreationError);
            };
            if confirmed_total < target {
                return Attempt::Done(if inclusive_total >= target {
                    SendResult::InsufficientConfirmedFunds
                } else {
                    SendResult::InsufficientFunds
                });
            }
            let request = SelectionRequest {
                spendable: &spendable,
                required: &proposal.policy.required_inputs,
                target,
                outputs: &outputs,
                fees,
            };
            match self.model.select_inputs(&request) {
                Some(selection) => selection,
                None => {
                    let mut everything = spendable.clone();
                    everything.extend(unconfirmed.iter().cloned());
                    let widened = SelectionRequest {
                        spendable: &everything,
                        ..request
                    };
                    return Attempt::Done(if self.model.select_inputs(&widened).is_some() {
                        SendResult::InsufficientConfirmedFunds
                    } else {
                        SendResult::InsufficientFunds
                    });
                }
            }
        };

        let mut tx = Transaction::new();
        tx.vin = selection
            .inputs
            .iter()
            .map(|output| TxIn::unsigned(output.outpoint))
            .collect();
        tx.vout = outputs;
        if selection.change > 0 {
            match self.signer.change_script(proposal.subaccount) {
                Ok(script_pubkey) => tx.vout.push(TxOut {
                    value: selection.change,
                    script_pubkey,
                }),
                Err(err) => {
                    walletd_log::log_warn!("proposal {} change key: {}", proposal.id, err);
                    return Attempt::Done(SendResult::ChangeError);
                }
            }
        }

        if let Err(err) = self.model.sign(&mut tx, &selection.inputs, self.signer.as_ref()) {
            walletd_log::log_warn!("proposal {} signing failed: {}", proposal.id, err);
            return Attempt::Done(SendResult::SignatureError);
        }
        let raw = match tx.consensus_encode() {
            Ok(raw) if raw.len() <= MAX_STANDARD_TX_SIZE => raw,
            Ok(raw) => {
                walletd_log::log_warn!(
                    "proposal {} transaction too large ({} bytes)",
                    proposal.id,
                    raw.len()
                );
                return Attempt::Done(SendResult::SerializationError);
            }
            Err(err) => {
                walletd_log::log_warn!("proposal {} serialization failed: {}", proposal.id, err);
                return Attempt::Done(SendResult::SerializationError);
            }
        };

        let outpoints: Vec<OutPoint> = selection
            .inputs
            .iter()
            .map(|output| output.outpoint)
            .collect();
        match self.ledger.reserve(&outpoints) {
            Ok(true) => {}
            Ok(false) => return Attempt::LostRace,
            Err(err) => {
                walletd_log::log_error!("proposal {} reservation failed: {}", proposal.id, err);
                return Attempt::Done(SendResult::DatabaseError);
            }
        }

        if let Err(err) = self.broadcaster.broadcast(&tx, &raw) {
            walletd_log::log_warn!("proposal {}: {}", proposal.id, err);
            if let Err(err) = self.ledger.release(&outpoints) {
                walletd_log::log_error!(
                    "proposal {} failed to release reservation: {}",
                    proposal.id,
                    err
                );
            }
            return Attempt::Done(SendResult::SendFailed);
        }

        if let Ok(txid) = tx.txid() {
            walletd_log::log_info!(
                "proposal {} sent {} ({} input(s), fee {})",
                proposal.id,
                hash256_to_hex(&txid),
                tx.vin.len(),
                selection.fee
            );
        }
        Attempt::Done(SendResult::Sent(tx))
    }

    /// Spends every spendable output to the first payment output.
    fn sweep(
        &self,
        spendable: &[WalletOutput],
        outputs: &mut [TxOut],
        fees: FeePolicy,
        has_pending: bool,
    ) -> Result<Selection, SendResult> {
        if spendable.is_empty() {
            return Err(if has_pending {
                SendResult::InsufficientConfirmedFunds
            } else {
                SendResult::InsufficientFunds
            });
        }
        let mut inputs = spendable.to_vec();
        inputs.sort_by(compare_largest_first);
        let total: Amount = inputs.iter().map(|output| output.value).sum();
        let fee = fees.fee_for_size(self.model.estimate_size(inputs.len(), outputs));
        let value = total - fee;
        let Some(payment) = outputs.first_mut() else {
            return Err(SendResult::MissingRecipients);
        };
        if value <= 0 || fees.is_dust(value, &payment.script_pubkey) {
            return Err(SendResult::InvalidSweep);
        }
        payment.value = value;
        Ok(Selection {
            inputs,
            fee,
            change: 0,
        })
    }
}
