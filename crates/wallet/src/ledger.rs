//! Wallet output ledger: the source of truth for spendability.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use walletd_chainstate::{Position, ReorgEvent, ReorgListener};
use walletd_consensus::constants::is_mature;
use walletd_consensus::money::{money_range, Amount};
use walletd_primitives::encoding::{DecodeError, Decoder, Encoder};
use walletd_primitives::OutPoint;
use walletd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::subchain::{SubaccountId, Subchain};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TxoState {
    UnconfirmedNew,
    UnconfirmedSpend,
    ConfirmedNew,
    ConfirmedSpend,
    OrphanedNew,
    OrphanedSpend,
    /// Never stored; reported for coinbase outputs below maturity.
    Immature,
}

impl TxoState {
    fn as_u8(self) -> u8 {
        match self {
            TxoState::UnconfirmedNew => 0,
            TxoState::UnconfirmedSpend => 1,
            TxoState::ConfirmedNew => 2,
            TxoState::ConfirmedSpend => 3,
            TxoState::OrphanedNew => 4,
            TxoState::OrphanedSpend => 5,
            TxoState::Immature => 6,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => TxoState::UnconfirmedNew,
            1 => TxoState::UnconfirmedSpend,
            2 => TxoState::ConfirmedNew,
            3 => TxoState::ConfirmedSpend,
            4 => TxoState::OrphanedNew,
            5 => TxoState::OrphanedSpend,
            _ => return None,
        })
    }

    pub fn is_unspent(self) -> bool {
        matches!(self, TxoState::UnconfirmedNew | TxoState::ConfirmedNew)
    }
}

#[derive(Debug)]
pub enum LedgerError {
    Store(StoreError),
    Decode(DecodeError),
    InvalidData(&'static str),
    UnknownOutput(OutPoint),
    Poisoned,
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Store(err) => write!(f, "{err}"),
            LedgerError::Decode(err) => write!(f, "{err}"),
            LedgerError::InvalidData(message) => write!(f, "{message}"),
            LedgerError::UnknownOutput(outpoint) => write!(
                f,
                "unknown wallet output {}:{}",
                walletd_consensus::hash256_to_hex(&outpoint.hash),
                outpoint.index
            ),
            LedgerError::Poisoned => write!(f, "ledger lock poisoned"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        LedgerError::Store(err)
    }
}

impl From<DecodeError> for LedgerError {
    fn from(err: DecodeError) -> Self {
        LedgerError::Decode(err)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletOutput {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
    pub subaccount: SubaccountId,
    pub subchain: Subchain,
    /// Block the output was mined in, if any.
    pub mined: Option<Position>,
    pub coinbase: bool,
    pub state: TxoState,
    /// Block the spending transaction was mined in, if any.
    pub spent: Option<Position>,
    /// The block that mined this output left the best chain and no later
    /// block has confirmed it again.
    pub orphaned: bool,
}

impl WalletOutput {
    pub fn unconfirmed(
        outpoint: OutPoint,
        value: Amount,
        script_pubkey: Vec<u8>,
        subaccount: SubaccountId,
        subchain: Subchain,
    ) -> Self {
        Self {
            outpoint,
            value,
            script_pubkey,
            subaccount,
            subchain,
            mined: None,
            coinbase: false,
            state: TxoState::UnconfirmedNew,
            spent: None,
            orphaned: false,
        }
    }

    pub fn confirmed(mut self, at: Position) -> Self {
        self.mined = Some(at);
        self.orphaned = false;
        self.state = TxoState::ConfirmedNew;
        self
    }

    pub fn coinbase(mut self) -> Self {
        self.coinbase = true;
        self
    }

    /// Stored state, with confirmed coinbase outputs reported as immature
    /// until they reach `maturity.target` confirmations.
    pub fn effective_state(&self, maturity: Option<Maturity>) -> TxoState {
        let (Some(mined), Some(maturity)) = (self.mined, maturity) else {
            return self.state;
        };
        let young = !is_mature(mined.height, maturity.best_height, maturity.target);
        if self.coinbase && self.state == TxoState::ConfirmedNew && young {
            TxoState::Immature
        } else {
            self.state
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(128);
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        encoder.write_u32_le(self.subaccount.0);
        encoder.write_u8(self.subchain.as_u8());
        encoder.write_u8(u8::from(self.coinbase) | u8::from(self.orphaned) << 1);
        encoder.write_u8(self.state.as_u8());
        write_position(&mut encoder, self.mined.as_ref());
        write_position(&mut encoder, self.spent.as_ref());
        encoder.into_inner()
    }

    fn decode(outpoint: OutPoint, bytes: &[u8]) -> Result<Self, LedgerError> {
        let mut decoder = Decoder::new(bytes);
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        let subaccount = SubaccountId(decoder.read_u32_le()?);
        let subchain = Subchain::from_u8(decoder.read_u8()?)
            .ok_or(LedgerError::InvalidData("unknown subchain tag"))?;
        let flags = decoder.read_u8()?;
        if flags & !0b11 != 0 {
            return Err(LedgerError::InvalidData("unknown output flags"));
        }
        let state = TxoState::from_u8(decoder.read_u8()?)
            .ok_or(LedgerError::InvalidData("unknown output state"))?;
        let mined = read_position(&mut decoder)?;
        let spent = read_position(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(LedgerError::Decode(DecodeError::TrailingBytes));
        }
        Ok(Self {
            outpoint,
            value,
            script_pubkey,
            subaccount,
            subchain,
            mined,
            coinbase: flags & 0b01 != 0,
            state,
            spent,
            orphaned: flags & 0b10 != 0,
        })
    }

    /// Drops every confirmation that `left` reports as gone from the best
    /// chain. A reservation outlives the loss of the creating block.
    fn orphan(&mut self, left: impl Fn(&Position) -> bool) {
        if self.spent.as_ref().is_some_and(&left) {
            self.spent = None;
            if self.state == TxoState::ConfirmedSpend {
                self.state = TxoState::OrphanedSpend;
            }
        }
        if self.mined.as_ref().is_some_and(&left) {
            self.mined = None;
            self.orphaned = true;
            if self.state == TxoState::ConfirmedNew {
                self.state = TxoState::OrphanedNew;
            }
        }
    }
}

fn write_position(encoder: &mut Encoder, position: Option<&Position>) {
    match position {
        Some(position) => {
            encoder.write_u8(1);
            encoder.write_bytes(&position.to_bytes());
        }
        None => encoder.write_u8(0),
    }
}

fn read_position(decoder: &mut Decoder<'_>) -> Result<Option<Position>, LedgerError> {
    match decoder.read_u8()? {
        0 => Ok(None),
        1 => {
            let bytes: [u8; 40] = decoder.read_fixed()?;
            Position::from_bytes(&bytes)
                .map(Some)
                .ok_or(LedgerError::InvalidData("invalid position"))
        }
        _ => Err(LedgerError::InvalidData("invalid position flag")),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Maturity {
    pub best_height: i64,
    pub target: i64,
}

/// Selects outputs by state. An empty `states` list matches everything.
#[derive(Clone, Debug, Default)]
pub struct OutputFilter {
    pub states: Vec<TxoState>,
    pub maturity: Option<Maturity>,
}

impl OutputFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn states(states: &[TxoState]) -> Self {
        Self {
            states: states.to_vec(),
            maturity: None,
        }
    }

    pub fn with_maturity(mut self, best_height: i64, target: i64) -> Self {
        self.maturity = Some(Maturity {
            best_height,
            target,
        });
        self
    }

    fn matches(&self, state: TxoState) -> bool {
        self.states.is_empty() || self.states.contains(&state)
    }
}

/// Transactional interface to the set of wallet outputs. Every method is
/// atomic with respect to the others.
pub trait UtxoLedger: Send + Sync {
    /// Outputs of `subaccount` (optionally one subchain) whose effective
    /// state passes `filter`, reported with that effective state.
    fn query(
        &self,
        subaccount: SubaccountId,
        subchain: Option<Subchain>,
        filter: &OutputFilter,
    ) -> Result<Vec<WalletOutput>, LedgerError>;

    /// Marks every outpoint `UnconfirmedSpend` if all of them are currently
    /// unspent; otherwise changes nothing and returns false.
    fn reserve(&self, outpoints: &[OutPoint]) -> Result<bool, LedgerError>;

    /// Undoes a reservation that was never confirmed.
    fn release(&self, outpoints: &[OutPoint]) -> Result<(), LedgerError>;

    /// Records that new outputs were mined, or that spends of them were, in
    /// the block at `at`.
    fn confirm(&self, outpoints: &[OutPoint], at: Position) -> Result<(), LedgerError>;

    /// Orphans the newest confirmation of each output: the spend of a
    /// confirmed spend, otherwise the creating block. Reserved outputs stay
    /// reserved and come back as orphaned when released.
    fn rollback(&self, outpoints: &[OutPoint]) -> Result<(), LedgerError>;
}

/// Key-value store backed ledger.
pub struct WalletLedger<S> {
    store: Arc<S>,
    outputs: Mutex<BTreeMap<OutPoint, WalletOutput>>,
}

impl<S: KeyValueStore> WalletLedger<S> {
    pub fn open(store: Arc<S>) -> Result<Self, LedgerError> {
        let mut outputs = BTreeMap::new();
        for (key, value) in store.scan_prefix(Column::WalletOutput, &[])? {
            let outpoint = OutPoint::from_key(&key)
                .ok_or(LedgerError::InvalidData("invalid wallet output key"))?;
            outputs.insert(outpoint, WalletOutput::decode(outpoint, &value)?);
        }
        walletd_log::log_debug!("wallet ledger loaded {} output(s)", outputs.len());
        Ok(Self {
            store,
            outputs: Mutex::new(outputs),
        })
    }

    /// Adds or replaces an output discovered by scanning.
    pub fn insert(&self, output: WalletOutput) -> Result<(), LedgerError> {
        if output.state == TxoState::Immature {
            return Err(LedgerError::InvalidData("immature is a derived state"));
        }
        if !money_range(output.value) {
            return Err(LedgerError::InvalidData("output value out of range"));
        }
        let mut outputs = self.lock()?;
        self.store
            .put(Column::WalletOutput, &output.outpoint.key(), &output.encode())?;
        outputs.insert(output.outpoint, output);
        Ok(())
    }

    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<WalletOutput>, LedgerError> {
        Ok(self.lock()?.get(outpoint).cloned())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|outputs| outputs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<OutPoint, WalletOutput>>, LedgerError> {
        self.outputs.lock().map_err(|_| LedgerError::Poisoned)
    }

    /// Applies `change` to each outpoint on a copy, persists the changed
    /// records in one batch, then publishes them.
    fn update(
        &self,
        outputs: &mut BTreeMap<OutPoint, WalletOutput>,
        outpoints: &[OutPoint],
        mut change: impl FnMut(&mut WalletOutput),
    ) -> Result<(), LedgerError> {
        let mut changed = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            let mut output = outputs
                .get(outpoint)
                .cloned()
                .ok_or(LedgerError::UnknownOutput(*outpoint))?;
            let before = output.clone();
            change(&mut output);
            if output != before {
                changed.push(output);
            }
        }
        if changed.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        for output in &changed {
            batch.put(Column::WalletOutput, output.outpoint.key(), output.encode());
        }
        self.store.write_batch(&batch)?;
        for output in changed {
            outputs.insert(output.outpoint, output);
        }
        Ok(())
    }

    fn orphan_disconnected(&self, event: &ReorgEvent) -> Result<usize, LedgerError> {
        let mut outputs = self.lock()?;
        let left = |position: &Position| event.disconnected.contains(position);
        let affected: Vec<OutPoint> = outputs
            .values()
            .filter(|output| {
                output.mined.as_ref().is_some_and(left) || output.spent.as_ref().is_some_and(left)
            })
            .map(|output| output.outpoint)
            .collect();
        self.update(&mut outputs, &affected, |output| output.orphan(left))?;
        Ok(affected.len())
    }
}

impl<S: KeyValueStore> UtxoLedger for WalletLedger<S> {
    fn query(
        &self,
        subaccount: SubaccountId,
        subchain: Option<Subchain>,
        filter: &OutputFilter,
    ) -> Result<Vec<WalletOutput>, LedgerError> {
        let outputs = self.lock()?;
        Ok(outputs
            .values()
            .filter(|output| output.subaccount == subaccount)
            .filter(|output| subchain.map_or(true, |subchain| output.subchain == subchain))
            .filter_map(|output| {
                let state = output.effective_state(filter.maturity);
                if !filter.matches(state) {
                    return None;
                }
                let mut output = output.clone();
                output.state = state;
                Some(output)
            })
            .collect())
    }

    fn reserve(&self, outpoints: &[OutPoint]) -> Result<bool, LedgerError> {
        let mut outputs = self.lock()?;
        let available = outpoints.iter().all(|outpoint| {
            outputs
                .get(outpoint)
                .map_or(false, |output| output.state.is_unspent())
        });
        if !available {
            return Ok(false);
        }
        self.update(&mut outputs, outpoints, |output| {
            output.state = TxoState::UnconfirmedSpend;
        })?;
        Ok(true)
    }

    fn release(&self, outpoints: &[OutPoint]) -> Result<(), LedgerError> {
        let mut outputs = self.lock()?;
        self.update(&mut outputs, outpoints, |output| {
            if output.state == TxoState::UnconfirmedSpend {
                output.state = if output.mined.is_some() {
                    TxoState::ConfirmedNew
                } else if output.orphaned {
                    TxoState::OrphanedNew
                } else {
                    TxoState::UnconfirmedNew
                };
            }
        })
    }

    fn confirm(&self, outpoints: &[OutPoint], at: Position) -> Result<(), LedgerError> {
        let mut outputs = self.lock()?;
        self.update(&mut outputs, outpoints, |output| match output.state {
            TxoState::UnconfirmedNew | TxoState::OrphanedNew => {
                output.mined = Some(at);
                output.orphaned = false;
                output.state = TxoState::ConfirmedNew;
            }
            TxoState::UnconfirmedSpend | TxoState::OrphanedSpend => {
                output.spent = Some(at);
                output.state = TxoState::ConfirmedSpend;
            }
            _ => {}
        })
    }

    fn rollback(&self, outpoints: &[OutPoint]) -> Result<(), LedgerError> {
        let mut outputs = self.lock()?;
        self.update(&mut outputs, outpoints, |output| {
            let newest = match output.state {
                TxoState::ConfirmedSpend => output.spent,
                TxoState::ConfirmedNew | TxoState::UnconfirmedSpend => output.mined,
                _ => None,
            };
            output.orphan(|position| Some(*position) == newest);
        })
    }
}

impl<S: KeyValueStore> ReorgListener for WalletLedger<S> {
    fn on_reorg(&self, event: &ReorgEvent) {
        if event.is_extension() {
            return;
        }
        match self.orphan_disconnected(event) {
            Ok(0) => {}
            Ok(count) => walletd_log::log_info!(
                "orphaned {} wallet output(s) after reorg at {}",
                count,
                event.fork_point
            ),
            Err(err) => walletd_log::log_error!(
                "failed to orphan wallet outputs after reorg at {}: {}",
                event.fork_point,
                err
            ),
        }
    }
}
