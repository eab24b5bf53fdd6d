// Copyright 2025 PRAGMA
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{ProcessorError, TradeStats, TransactionStats};
use crate::store::{BatchInsertBuilder, EffectKind, HistoryStore, RecordKind, Row};
use ledgerline_kernel::{
    AccountId, Asset, Cancelled, ClaimAtom, LedgerCloseMeta, LedgerEntry, LedgerEntryChange,
    LedgerSequence, Operation, OperationBody, Price,
};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

pub fn operation_kind(body: &OperationBody) -> &'static str {
    match body {
        OperationBody::CreateAccount { .. } => "create_account",
        OperationBody::Payment { .. } => "payment",
        OperationBody::ManageSellOffer { .. } => "manage_sell_offer",
        OperationBody::ChangeTrust { .. } => "change_trust",
    }
}

fn effect(
    ledger: LedgerSequence,
    account: &AccountId,
    kind: EffectKind,
    asset: &Asset,
    amount: i64,
) -> Row {
    Row::Effect {
        ledger,
        account: account.clone(),
        kind,
        asset: asset.clone(),
        amount,
    }
}

/// Effects of a successful operation on the accounts it touches.
pub(crate) fn effects(ledger: LedgerSequence, source: &AccountId, operation: &Operation) -> Vec<Row> {
    let mut rows = match &operation.body {
        OperationBody::CreateAccount {
            destination,
            starting_balance,
        } => vec![
            effect(ledger, destination, EffectKind::AccountCreated, &Asset::Native, *starting_balance),
            effect(ledger, source, EffectKind::AccountDebited, &Asset::Native, *starting_balance),
        ],
        OperationBody::Payment {
            destination,
            asset,
            amount,
        } => vec![
            effect(ledger, destination, EffectKind::AccountCredited, asset, *amount),
            effect(ledger, source, EffectKind::AccountDebited, asset, *amount),
        ],
        OperationBody::ChangeTrust { asset, limit } => {
            vec![effect(ledger, source, EffectKind::TrustlineChanged, asset, *limit)]
        }
        OperationBody::ManageSellOffer { .. } => vec![],
    };

    for claim in &operation.claims {
        rows.push(effect(
            ledger,
            source,
            EffectKind::Trade,
            &claim.asset_sold,
            claim.amount_sold,
        ));
        rows.push(effect(
            ledger,
            &claim.seller_id,
            EffectKind::Trade,
            &claim.asset_bought,
            claim.amount_bought,
        ));
    }

    rows
}

/// Distance between the rate a claim executed at and the price of the crossed offer, in basis
/// points of that price.
pub(crate) fn rounding_slippage_bps(claim: &ClaimAtom, price: Price) -> Option<u32> {
    let sold = i128::from(claim.amount_sold);
    let bought = i128::from(claim.amount_bought);
    let (n, d) = (i128::from(price.n), i128::from(price.d));

    let reference = sold * n;
    if reference <= 0 || d <= 0 {
        return None;
    }

    let slippage = (bought * d - reference).abs() * 10_000 / reference;
    Some(u32::try_from(slippage).unwrap_or(u32::MAX))
}

/// The price of a crossed offer, when the transaction left that offer in place.
fn crossed_offer_price(offer_id: i64, changes: &[LedgerEntryChange]) -> Option<Price> {
    changes.iter().find_map(|change| match change {
        LedgerEntryChange::Created(LedgerEntry::Offer(offer))
        | LedgerEntryChange::Updated(LedgerEntry::Offer(offer))
            if offer.offer_id == offer_id =>
        {
            Some(offer.price)
        }
        LedgerEntryChange::Created(_)
        | LedgerEntryChange::Updated(_)
        | LedgerEntryChange::Removed(_) => None,
    })
}

pub(crate) fn trade(
    ledger: LedgerSequence,
    buyer: &AccountId,
    claim: &ClaimAtom,
    changes: &[LedgerEntryChange],
) -> Row {
    Row::Trade {
        ledger,
        seller: claim.seller_id.clone(),
        buyer: buyer.clone(),
        offer_id: claim.offer_id,
        sold: claim.asset_sold.clone(),
        amount_sold: claim.amount_sold,
        bought: claim.asset_bought.clone(),
        amount_bought: claim.amount_bought,
        rounding_slippage_bps: crossed_offer_price(claim.offer_id, changes)
            .and_then(|price| rounding_slippage_bps(claim, price)),
    }
}

fn operation_assets(operation: &Operation) -> Vec<&Asset> {
    let mut assets = match &operation.body {
        OperationBody::CreateAccount { .. } => vec![],
        OperationBody::Payment { asset, .. } | OperationBody::ChangeTrust { asset, .. } => {
            vec![asset]
        }
        OperationBody::ManageSellOffer {
            selling, buying, ..
        } => vec![selling, buying],
    };
    for claim in &operation.claims {
        assets.push(&claim.asset_sold);
        assets.push(&claim.asset_bought);
    }
    assets
}

/// Write the history rows of every transaction of the ledger. Failed transactions only land in
/// the filtered table.
pub(crate) async fn write_transaction_rows(
    store: &dyn HistoryStore,
    ledger: &LedgerCloseMeta,
    max_batch_size: usize,
    cancel: &CancellationToken,
) -> Result<(TransactionStats, TradeStats), ProcessorError> {
    let sequence = ledger.sequence;
    let builder = |kind| BatchInsertBuilder::new(store, kind, max_batch_size);

    let mut transactions = builder(RecordKind::Transactions);
    let mut filtered = builder(RecordKind::FilteredTransactions);
    let mut operations = builder(RecordKind::Operations);
    let mut participants = builder(RecordKind::Participants);
    let mut effect_rows = builder(RecordKind::Effects);
    let mut trades = builder(RecordKind::Trades);
    let mut assets = builder(RecordKind::Assets);

    let mut transaction_stats = TransactionStats::default();
    let mut trade_stats = TradeStats::default();
    let mut seen_assets: BTreeSet<&Asset> = BTreeSet::new();

    for tx in &ledger.transactions {
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }

        transaction_stats.record(tx);

        if !tx.successful {
            filtered
                .add(Row::FilteredTransaction {
                    ledger: sequence,
                    hash: tx.hash,
                    close_time: ledger.close_time,
                })
                .await?;
            continue;
        }

        transactions
            .add(Row::Transaction {
                ledger: sequence,
                hash: tx.hash,
                source: tx.source.clone(),
                fee_charged: tx.fee_charged,
                operation_count: u32::try_from(tx.operations.len()).unwrap_or(u32::MAX),
            })
            .await?;

        for account in tx.participants() {
            participants
                .add(Row::Participant {
                    ledger: sequence,
                    transaction: tx.hash,
                    account,
                })
                .await?;
        }

        for (index, operation) in tx.operations.iter().enumerate() {
            let source = operation.source.as_ref().unwrap_or(&tx.source);

            operations
                .add(Row::Operation {
                    ledger: sequence,
                    transaction: tx.hash,
                    index: u32::try_from(index).unwrap_or(u32::MAX),
                    kind: operation_kind(&operation.body),
                    source: source.clone(),
                })
                .await?;

            for row in effects(sequence, source, operation) {
                effect_rows.add(row).await?;
            }

            for claim in &operation.claims {
                let row = trade(sequence, source, claim, &tx.changes);
                trade_stats.trades += 1;
                if let Row::Trade {
                    rounding_slippage_bps: None,
                    ..
                } = row
                {
                    trade_stats.unknown_slippage += 1;
                }
                trades.add(row).await?;
            }

            for asset in operation_assets(operation) {
                if !asset.is_native() && seen_assets.insert(asset) {
                    assets
                        .add(Row::Asset {
                            asset: asset.clone(),
                        })
                        .await?;
                }
            }
        }
    }

    transactions.exec().await?;
    filtered.exec().await?;
    operations.exec().await?;
    participants.exec().await?;
    effect_rows.exec().await?;
    trades.exec().await?;
    assets.exec().await?;

    Ok((transaction_stats, trade_stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerline_kernel::{account::any_account_id, OfferEntry};
    use proptest::prelude::*;

    fn claim(amount_sold: i64, amount_bought: i64) -> ClaimAtom {
        ClaimAtom {
            seller_id: AccountId::from("GSELLER"),
            offer_id: 9,
            asset_sold: Asset::credit("USD", AccountId::from("GISSUER")),
            amount_sold,
            asset_bought: Asset::Native,
            amount_bought,
        }
    }

    #[test]
    fn exact_execution_has_no_slippage() {
        assert_eq!(
            rounding_slippage_bps(&claim(100, 200), Price { n: 2, d: 1 }),
            Some(0)
        );
    }

    #[test]
    fn slippage_is_relative_to_the_offer_price() {
        // Expected 200, got 201: half a percent.
        assert_eq!(
            rounding_slippage_bps(&claim(100, 201), Price { n: 2, d: 1 }),
            Some(50)
        );
        assert_eq!(rounding_slippage_bps(&claim(0, 1), Price { n: 2, d: 1 }), None);
    }

    #[test]
    fn slippage_is_unknown_once_the_offer_is_gone() {
        let ledger = LedgerSequence::new(10);
        let buyer = AccountId::from("GBUYER");
        let removed = [LedgerEntryChange::Removed(ledgerline_kernel::LedgerKey::Offer(9))];
        let Row::Trade {
            rounding_slippage_bps,
            ..
        } = trade(ledger, &buyer, &claim(100, 200), &removed)
        else {
            panic!("expected a trade row");
        };
        assert_eq!(rounding_slippage_bps, None);

        let updated = [LedgerEntryChange::Updated(LedgerEntry::Offer(OfferEntry {
            seller_id: AccountId::from("GSELLER"),
            offer_id: 9,
            selling: Asset::credit("USD", AccountId::from("GISSUER")),
            buying: Asset::Native,
            amount: 5,
            price: Price { n: 2, d: 1 },
            flags: 0,
        }))];
        let Row::Trade {
            rounding_slippage_bps,
            ..
        } = trade(ledger, &buyer, &claim(100, 200), &updated)
        else {
            panic!("expected a trade row");
        };
        assert_eq!(rounding_slippage_bps, Some(0));
    }

    #[test]
    fn payments_credit_and_debit() {
        let operation = Operation {
            source: None,
            body: OperationBody::Payment {
                destination: AccountId::from("GDEST"),
                asset: Asset::Native,
                amount: 42,
            },
            claims: vec![],
        };
        let rows = effects(LedgerSequence::new(3), &AccountId::from("GSRC"), &operation);
        assert_eq!(
            rows,
            vec![
                effect(
                    LedgerSequence::new(3),
                    &AccountId::from("GDEST"),
                    EffectKind::AccountCredited,
                    &Asset::Native,
                    42
                ),
                effect(
                    LedgerSequence::new(3),
                    &AccountId::from("GSRC"),
                    EffectKind::AccountDebited,
                    &Asset::Native,
                    42
                ),
            ]
        );
    }

    proptest! {
        #[test]
        fn exact_fills_never_slip(amount in 1i64..1_000_000, n in 1i32..1_000, d in 1i32..1_000) {
            let exact = claim(amount * i64::from(d), amount * i64::from(n));
            prop_assert_eq!(rounding_slippage_bps(&exact, Price { n, d }), Some(0));
        }

        #[test]
        fn payments_debit_their_source(
            source in any_account_id(),
            destination in any_account_id(),
            amount in 1i64..i64::MAX,
        ) {
            let operation = Operation {
                source: None,
                body: OperationBody::Payment {
                    destination,
                    asset: Asset::Native,
                    amount,
                },
                claims: vec![],
            };
            let rows = effects(LedgerSequence::new(1), &source, &operation);
            prop_assert!(rows.iter().any(|row| matches!(
                row,
                Row::Effect { account, kind: EffectKind::AccountDebited, amount: debited, .. }
                    if *account == source && *debited == amount
            )), "expected an AccountDebited effect for the payment source");
        }
    }
}
