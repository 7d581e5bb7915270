use thiserror::Error;

type Result<T> = std::result::Result<T, PaddingError>;

/// Prepends `pad_value` to `data` until it is `total_length` long.
///
/// # Errors
///
/// * `PaddingError::SequenceTooLong` - if `data` is already longer than
///   `total_length`. Callers are expected to truncate first.
pub fn left_padding<T: Copy>(data: &[T], pad_value: T, total_length: usize) -> Result<Vec<T>> {
    let tokens_to_pad = pad_count(data.len(), total_length)?;
    let mut padded = Vec::with_capacity(total_length);
    padded.resize(tokens_to_pad, pad_value);
    padded.extend_from_slice(data);
    Ok(padded)
}

/// Appends `pad_value` to `data` until it is `total_length` long.
///
/// # Errors
///
/// * `PaddingError::SequenceTooLong` - if `data` is already longer than
///   `total_length`.
pub fn right_padding<T: Copy>(data: &[T], pad_value: T, total_length: usize) -> Result<Vec<T>> {
    pad_count(data.len(), total_length)?;
    let mut padded = Vec::with_capacity(total_length);
    padded.extend_from_slice(data);
    padded.resize(total_length, pad_value);
    Ok(padded)
}

fn pad_count(len: usize, total_length: usize) -> Result<usize> {
    total_length
        .checked_sub(len)
        .ok_or(PaddingError::SequenceTooLong { len, total_length })
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PaddingError {
    #[error("Cannot pad a sequence of length {len} to total length {total_length}")]
    SequenceTooLong { len: usize, total_length: usize },
}
