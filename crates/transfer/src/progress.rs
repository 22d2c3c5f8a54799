use std::sync::Arc;

use futures_util::Stream;
use futures_util::stream;
use tokio::sync::mpsc;

/// Receives upload percentages (`0..=100`) while a body is being sent.
pub type ProgressSender = mpsc::Sender<u8>;

/// Computes `round(sent * 100 / total)`, capped at 100.
///
/// An empty body counts as fully sent.
pub fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (sent as f64 * 100.0 / total as f64).round();
    pct.min(100.0) as u8
}

/// Splits `data` into body chunks and reports the percentage handed to the
/// transport after each chunk.
///
/// A percentage is only reported when it changes. Reporting never blocks the
/// upload: if the receiver lags, the value is dropped.
pub(crate) fn counting_stream(
    data: Arc<[u8]>,
    chunk_size: usize,
    progress_tx: ProgressSender,
) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
    let chunk_size = chunk_size.max(1);
    let total = data.len();

    stream::unfold((0usize, None::<u8>), move |(offset, last)| {
        let data = Arc::clone(&data);
        let progress_tx = progress_tx.clone();
        async move {
            if offset >= total {
                return None;
            }
            let end = (offset + chunk_size).min(total);
            let chunk = data[offset..end].to_vec();

            let pct = percent_of(end as u64, total as u64);
            if last != Some(pct) {
                let _ = progress_tx.try_send(pct);
            }

            Some((Ok(chunk), (end, Some(pct))))
        }
    })
}
