use chsync::error::{ErrorKind, SyncResult};
use chsync::sync_error;
use chsync::types::DestinationRow;
use serde_json::{Map, Value};

/// Appends `row` to `buf` as one JSONEachRow line.
pub(crate) fn encode_row(row: &DestinationRow, buf: &mut Vec<u8>) -> SyncResult<()> {
    serde_json::to_writer(&mut *buf, row).map_err(|err| {
        sync_error!(
            ErrorKind::SerializationFailure,
            "Row could not be encoded as JSON",
            err
        )
    })?;
    buf.push(b'\n');

    Ok(())
}

/// Decodes a JSONEachRow response. Blank lines are ignored.
pub(crate) fn decode_rows(body: &[u8]) -> SyncResult<Vec<DestinationRow>> {
    let body = std::str::from_utf8(body).map_err(|err| {
        sync_error!(
            ErrorKind::DeserializationError,
            "ClickHouse returned a response that is not UTF-8",
            err
        )
    })?;

    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let values: Map<String, Value> = serde_json::from_str(line).map_err(|err| {
                sync_error!(
                    ErrorKind::DeserializationError,
                    "ClickHouse returned an invalid JSONEachRow line",
                    err
                )
            })?;

            Ok(DestinationRow::new(values))
        })
        .collect()
}
