//! Filter kernels on 8-bit elements.
//!
//! Bit vectors are packed LSB-first, one bit per input element.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Aggregates, Operation};

/// Parameters of a filter job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterSpec {
    /// Bit i is set when `low <= input[i] <= high`.
    Scan { low: u8, high: u8 },
    /// Elements with index in `first..=last`.
    Extract { first: usize, last: usize },
    /// Elements whose mask bit is set.
    Select { mask: Vec<u8> },
    /// One output element per mask bit: next input element for 1, zero for 0.
    Expand { mask: Vec<u8>, bits: usize },
}

impl FilterSpec {
    pub fn operation(&self) -> Operation {
        match self {
            FilterSpec::Scan { .. } => Operation::Scan,
            FilterSpec::Extract { .. } => Operation::Extract,
            FilterSpec::Select { .. } => Operation::Select,
            FilterSpec::Expand { .. } => Operation::Expand,
        }
    }

    /// Upper bound of output bytes for `input_len` elements.
    pub fn max_output_len(&self, input_len: usize) -> usize {
        match self {
            FilterSpec::Scan { .. } => input_len.div_ceil(8),
            FilterSpec::Extract { .. } | FilterSpec::Select { .. } => input_len,
            FilterSpec::Expand { bits, .. } => *bits,
        }
    }
}

#[inline]
fn mask_bit(mask: &[u8], index: usize) -> bool {
    mask.get(index / 8)
        .map(|byte| byte & (1 << (index % 8)) != 0)
        .unwrap_or(false)
}

/// Run a filter over `input`, appending to `out`.
pub fn run_filter(spec: &FilterSpec, input: &[u8], out: &mut Vec<u8>) -> Result<Aggregates> {
    match spec {
        FilterSpec::Scan { low, high } => Ok(scan(input, *low, *high, out)),
        FilterSpec::Extract { first, last } => {
            if first > last {
                return Err(Error::config("extract range is reversed"));
            }
            let end = (*last + 1).min(input.len());
            let selected = input.get(*first..end).unwrap_or(&[]);
            out.extend_from_slice(selected);
            Ok(value_aggregates(selected))
        }
        FilterSpec::Select { mask } => {
            if mask.len() * 8 < input.len() {
                return Err(Error::config("select mask shorter than input"));
            }
            let start = out.len();
            out.extend(
                input
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask_bit(mask, *i))
                    .map(|(_, &v)| v),
            );
            Ok(value_aggregates(&out[start..]))
        }
        FilterSpec::Expand { mask, bits } => {
            if mask.len() * 8 < *bits {
                return Err(Error::config("expand mask shorter than declared length"));
            }
            let start = out.len();
            let mut elements = input.iter();
            for i in 0..*bits {
                if mask_bit(mask, i) {
                    let value = elements
                        .next()
                        .ok_or_else(|| Error::unexpected_eof(input.len()))?;
                    out.push(*value);
                } else {
                    out.push(0);
                }
            }
            Ok(value_aggregates(&out[start..]))
        }
    }
}

fn scan(input: &[u8], low: u8, high: u8, out: &mut Vec<u8>) -> Aggregates {
    let mut agg = Aggregates {
        min_first: u32::MAX,
        ..Aggregates::default()
    };

    for (chunk_index, chunk) in input.chunks(8).enumerate() {
        let mut byte = 0u8;
        for (bit, &value) in chunk.iter().enumerate() {
            if (low..=high).contains(&value) {
                byte |= 1 << bit;
                let index = (chunk_index * 8 + bit) as u32;
                agg.min_first = agg.min_first.min(index);
                agg.max_last = index;
                agg.sum += 1;
            }
        }
        out.push(byte);
    }

    if agg.sum == 0 {
        agg.min_first = 0;
    }
    agg
}

fn value_aggregates(values: &[u8]) -> Aggregates {
    if values.is_empty() {
        return Aggregates::default();
    }
    Aggregates {
        min_first: values.iter().copied().min().unwrap_or(0) as u32,
        max_last: values.iter().copied().max().unwrap_or(0) as u32,
        sum: values.iter().map(|&v| v as u32).sum(),
    }
}
