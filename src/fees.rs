//! Fee calculation collaborator.

/// Pure function over resolved capacities. The importer resolves every input
/// to its previous output before asking for a fee, so implementations never
/// touch the store.
pub trait FeeCalculator {
    fn transaction_fee(&self, input_capacities: &[u64], output_capacities: &[u64]) -> u64;
}

/// Fee is the capacity surplus of inputs over outputs. Issuance transactions
/// never reach this path; the importer assigns them a zero fee directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct CapacityFeeCalculator;

impl FeeCalculator for CapacityFeeCalculator {
    fn transaction_fee(&self, input_capacities: &[u64], output_capacities: &[u64]) -> u64 {
        let inputs: u64 = input_capacities.iter().sum();
        let outputs: u64 = output_capacities.iter().sum();
        inputs.saturating_sub(outputs)
    }
}
