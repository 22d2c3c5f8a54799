use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Commands (client to service)
// ---------------------------------------------------------------------------

/// Start command sent once per job (`upload_file` or `process_csv`).
///
/// `file` is present only when the bytes travel over the event channel
/// rather than (or in addition to) the HTTP upload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StartCommand {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "byte_array::option"
    )]
    pub file: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// Push events (service to client)
// ---------------------------------------------------------------------------

/// Processing progress tick.
///
/// Services send either `{"percent": n}` or `{"progress": n}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    #[serde(alias = "progress")]
    pub percent: f64,
}

impl ProgressPayload {
    /// Returns the percentage rounded and clamped into `0..=100`.
    pub fn clamped(&self) -> u8 {
        self.percent.round().clamp(0.0, 100.0) as u8
    }
}

/// Completion payload carried by `file_ready` / `processed_file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReadyPayload {
    pub filename: String,
    #[serde(with = "byte_array")]
    pub data: Vec<u8>,
}

/// Error pushed by the service; ends the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Binary fields travel as JSON arrays of integers (`[104, 105]`).
///
/// Base64 strings are accepted on decode for services that encode bytes
/// that way.
pub mod byte_array {
    use std::fmt;

    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(data.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        deserializer.deserialize_any(BytesVisitor)
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an array of bytes or a base64 string")
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(out)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Vec<u8>, E> {
            STANDARD.decode(v).map_err(E::custom)
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            data: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match data {
                Some(bytes) => super::serialize(bytes, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            #[derive(Deserialize)]
            struct Wrapped(#[serde(with = "super")] Vec<u8>);

            Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|w| w.0))
        }
    }
}
