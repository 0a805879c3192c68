use certforge_core::BatchOptions;

// Gas units per operation, calibrated against the relayer's contract.
const MINT_GAS: u128 = 150_000;
/// One standalone transfer transaction.
const SINGLE_TRANSFER_GAS: u128 = 65_000;
/// Fixed overhead of one chunked batch-transfer transaction.
const BATCH_TRANSFER_BASE_GAS: u128 = 80_000;
/// Marginal gas per item inside a batch-transfer chunk. Cheaper than a
/// standalone transfer, which is where the batching discount comes from.
const BATCH_TRANSFER_ITEM_GAS: u128 = 25_000;

const GAS_PRICE_WEI: u128 = 30_000_000_000;
/// Price assumed when the tenant opts into slower, cheaper inclusion.
const OPTIMIZED_GAS_PRICE_WEI: u128 = 18_000_000_000;

/// Estimates the on-chain cost in wei of minting (and transferring)
/// `recipient_count` certificates. Monotonic non-decreasing in
/// `recipient_count` for fixed options.
pub fn estimate_mint_cost_wei(
    recipient_count: u32,
    options: &BatchOptions,
) -> u128 {
    let count = recipient_count as u128;
    let price = if options.gas_optimization {
        OPTIMIZED_GAS_PRICE_WEI
    } else {
        GAS_PRICE_WEI
    };

    let mint_gas = count * MINT_GAS;
    let transfer_gas = if options.batch_transfer {
        let chunk = options.transfer_batch_size.max(1) as u128;
        let chunks = count.div_ceil(chunk);
        chunks * BATCH_TRANSFER_BASE_GAS + count * BATCH_TRANSFER_ITEM_GAS
    } else {
        count * SINGLE_TRANSFER_GAS
    };

    (mint_gas + transfer_gas) * price
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_monotonic_in_recipient_count() {
        for batch_transfer in [false, true] {
            let options = BatchOptions {
                batch_transfer,
                ..Default::default()
            };
            let mut prev = 0;
            for count in 0..2_000 {
                let cost = estimate_mint_cost_wei(count, &options);
                assert!(
                    cost >= prev,
                    "cost regressed at count {} (batch: {})",
                    count,
                    batch_transfer
                );
                prev = cost;
            }
        }
    }

    #[test]
    fn test_zero_recipients_cost_nothing() {
        assert_eq!(estimate_mint_cost_wei(0, &BatchOptions::default()), 0);
    }

    #[test]
    fn test_batch_transfer_discount_kicks_in() {
        let single = BatchOptions::default();
        let batched = BatchOptions {
            batch_transfer: true,
            ..Default::default()
        };
        // Large enough that chunk overhead is amortized away
        for count in [50, 500, 5_000] {
            assert!(
                estimate_mint_cost_wei(count, &batched)
                    < estimate_mint_cost_wei(count, &single),
                "count {}",
                count
            );
        }
    }

    #[test]
    fn test_gas_optimization_is_cheaper() {
        let normal = BatchOptions::default();
        let optimized = BatchOptions {
            gas_optimization: true,
            ..Default::default()
        };
        assert!(
            estimate_mint_cost_wei(10, &optimized)
                < estimate_mint_cost_wei(10, &normal)
        );
    }
}
