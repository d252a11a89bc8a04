use std::io::{Read, Write};

use sieveprims_frame::{SequenceReader, SequenceWriter};

use crate::error::{Result, StageError};

/// What one stage saw and produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageOutcome {
    /// Head of the input sequence, `None` if the input was empty.
    pub divisor: Option<i32>,
    /// Number of elements received.
    pub received: usize,
    /// Number of survivors sent.
    pub survivors: usize,
}

/// Keep the elements of `remainder` not divisible by `divisor`, in order.
pub fn remove_multiples(remainder: &[i32], divisor: i32) -> Result<Vec<i32>> {
    if divisor == 0 {
        return Err(StageError::InvalidDivisor(divisor));
    }
    Ok(remainder
        .iter()
        .copied()
        .filter(|x| x.wrapping_rem(divisor) != 0)
        .collect())
}

/// Filter one stage's input: the head is the divisor and never survives.
pub fn filter_sequence(input: &[i32]) -> Result<Vec<i32>> {
    match input.split_first() {
        Some((&divisor, remainder)) => remove_multiples(remainder, divisor),
        None => Ok(Vec::new()),
    }
}

/// Receive one sequence, filter it, and send exactly one frame back.
///
/// A closed input counts as an empty sequence, so an empty frame is still
/// written.
pub fn run_stage<R: Read, W: Write>(
    input: &mut SequenceReader<R>,
    output: &mut SequenceWriter<W>,
) -> Result<StageOutcome> {
    let received = input.recv_sequence()?.unwrap_or_default();
    let survivors = filter_sequence(&received)?;
    output.send_sequence(&survivors)?;

    Ok(StageOutcome {
        divisor: received.first().copied(),
        received: received.len(),
        survivors: survivors.len(),
    })
}
