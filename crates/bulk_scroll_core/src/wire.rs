//! Binary-compatible wire form of the request envelope's scalar fields
//! (the opaque `search_source` payload aside, everything a caller needs to
//! reconstruct a [`crate::request::BulkByScrollRequest`]'s scalar knobs).
//! Transport wire encoding in general is out of scope for this crate (see
//! `spec.md` §1); this is a minimal varint/LEB128 codec for exactly the
//! fields `spec.md` §6 names, not a general-purpose serialization format.

use std::time::Duration;

use bulk_scroll_client::WriteConsistency;

use crate::request::BulkByScrollRequest;

fn write_varint_u64(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

fn read_varint_u64(buf: &[u8], pos: &mut usize) -> anyhow::Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| anyhow::anyhow!("truncated varint at offset {}", pos))?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            anyhow::bail!("varint too long");
        }
    }
}

/// Zigzag-encode a signed 64-bit value so small negative numbers (notably
/// `size == -1`, "all matches") stay cheap to varint-encode.
fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn write_duration(buf: &mut Vec<u8>, d: Duration) {
    write_varint_u64(buf, d.as_millis() as u64);
}

fn read_duration(buf: &[u8], pos: &mut usize) -> anyhow::Result<Duration> {
    Ok(Duration::from_millis(read_varint_u64(buf, pos)?))
}

fn consistency_byte(c: WriteConsistency) -> u8 {
    match c {
        WriteConsistency::One => 0,
        WriteConsistency::Quorum => 1,
        WriteConsistency::All => 2,
    }
}

fn consistency_from_byte(b: u8) -> anyhow::Result<WriteConsistency> {
    match b {
        0 => Ok(WriteConsistency::One),
        1 => Ok(WriteConsistency::Quorum),
        2 => Ok(WriteConsistency::All),
        other => anyhow::bail!("unknown write-consistency byte id {other}"),
    }
}

/// The scalar subset of [`BulkByScrollRequest`] that has a defined binary
/// wire form: `search_source, abort_on_version_conflict, size, refresh,
/// timeout, consistency, retry_backoff_initial, max_retries`, in that
/// order. Source indices, destination index, and context/header maps are
/// transport-layer concerns (see `spec.md` §1's "transport wire encoding"
/// non-goal) and aren't part of this codec.
impl BulkByScrollRequest {
    pub fn encode_envelope(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let source_bytes = serde_json::to_vec(&self.search_source).expect("Value always serializes");
        write_varint_u64(&mut buf, source_bytes.len() as u64);
        buf.extend_from_slice(&source_bytes);
        buf.push(self.abort_on_version_conflict as u8);
        write_varint_u64(&mut buf, zigzag_encode(self.size));
        buf.push(self.refresh as u8);
        write_duration(&mut buf, self.timeout);
        buf.push(consistency_byte(self.consistency));
        write_duration(&mut buf, self.retry_backoff_initial);
        write_varint_u64(&mut buf, self.max_retries as u64);
        buf
    }

    /// Decode an envelope previously produced by [`Self::encode_envelope`]
    /// for the given `kind`/`source_indices` (neither of which round-trips
    /// through the wire form, so the caller supplies them).
    pub fn decode_envelope(
        kind: crate::request::RequestKind,
        source_indices: Vec<String>,
        bytes: &[u8],
    ) -> anyhow::Result<Self> {
        let mut pos = 0;
        let source_len = read_varint_u64(bytes, &mut pos)? as usize;
        let source_bytes = bytes
            .get(pos..pos + source_len)
            .ok_or_else(|| anyhow::anyhow!("truncated search_source in wire envelope"))?;
        let search_source: serde_json::Value = serde_json::from_slice(source_bytes)?;
        pos += source_len;

        let abort_on_version_conflict = *bytes
            .get(pos)
            .ok_or_else(|| anyhow::anyhow!("truncated envelope: missing abort_on_version_conflict"))?
            != 0;
        pos += 1;

        let size = zigzag_decode(read_varint_u64(bytes, &mut pos)?);

        let refresh = *bytes
            .get(pos)
            .ok_or_else(|| anyhow::anyhow!("truncated envelope: missing refresh"))?
            != 0;
        pos += 1;

        let timeout = read_duration(bytes, &mut pos)?;

        let consistency_b = *bytes
            .get(pos)
            .ok_or_else(|| anyhow::anyhow!("truncated envelope: missing consistency"))?;
        pos += 1;
        let consistency = consistency_from_byte(consistency_b)?;

        let retry_backoff_initial = read_duration(bytes, &mut pos)?;
        let max_retries = read_varint_u64(bytes, &mut pos)? as u32;

        let mut req = BulkByScrollRequest::new(kind, source_indices);
        req.search_source = search_source;
        req.abort_on_version_conflict = abort_on_version_conflict;
        req.size = size;
        req.refresh = refresh;
        req.timeout = timeout;
        req.consistency = consistency;
        req.retry_backoff_initial = retry_backoff_initial;
        req.max_retries = max_retries;
        Ok(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestKind;

    #[test]
    fn envelope_round_trips_default_request() {
        let req = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        let bytes = req.encode_envelope();
        let decoded =
            BulkByScrollRequest::decode_envelope(RequestKind::UpdateByQuery, vec!["a".to_string()], &bytes)
                .unwrap();
        assert_eq!(decoded.size, req.size);
        assert_eq!(decoded.abort_on_version_conflict, req.abort_on_version_conflict);
        assert_eq!(decoded.refresh, req.refresh);
        assert_eq!(decoded.timeout, req.timeout);
        assert_eq!(decoded.consistency, req.consistency);
        assert_eq!(decoded.retry_backoff_initial, req.retry_backoff_initial);
        assert_eq!(decoded.max_retries, req.max_retries);
    }

    #[test]
    fn envelope_round_trips_unlimited_size_and_custom_source() {
        let mut req = BulkByScrollRequest::new(RequestKind::Reindex, vec!["src".to_string()]);
        req.size = -1;
        req.refresh = true;
        req.abort_on_version_conflict = false;
        req.consistency = WriteConsistency::All;
        req.search_source = serde_json::json!({ "query": { "match_all": {} } });
        let bytes = req.encode_envelope();
        let decoded =
            BulkByScrollRequest::decode_envelope(RequestKind::Reindex, vec!["src".to_string()], &bytes)
                .unwrap();
        assert_eq!(decoded.size, -1);
        assert!(decoded.refresh);
        assert!(!decoded.abort_on_version_conflict);
        assert_eq!(decoded.consistency, WriteConsistency::All);
        assert_eq!(decoded.search_source, req.search_source);
    }

    #[test]
    fn envelope_round_trips_bounded_size() {
        let mut req = BulkByScrollRequest::new(RequestKind::DeleteByQuery, vec!["a".to_string()]);
        req.size = 4200;
        let bytes = req.encode_envelope();
        let decoded =
            BulkByScrollRequest::decode_envelope(RequestKind::DeleteByQuery, vec!["a".to_string()], &bytes)
                .unwrap();
        assert_eq!(decoded.size, 4200);
    }

    #[test]
    fn decode_rejects_truncated_envelope() {
        let req = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        let mut bytes = req.encode_envelope();
        bytes.truncate(bytes.len() - 1);
        let err =
            BulkByScrollRequest::decode_envelope(RequestKind::UpdateByQuery, vec!["a".to_string()], &bytes)
                .unwrap_err();
        assert!(err.to_string().to_lowercase().contains("truncated") || err.to_string().contains("varint"));
    }
}
