/// Serialize durations as Go style duration strings ("250ms", "1h30m").
pub mod serde_dur {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&format!("{}ms", d.as_millis()))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		let raw = String::deserialize(deserializer)?;
		parse(&raw).map_err(serde::de::Error::custom)
	}

	pub fn parse(raw: &str) -> Result<Duration, String> {
		let nanos = go_parse_duration::parse_duration(raw)
			.map_err(|e| format!("invalid duration {raw:?}: {e:?}"))?;
		u64::try_from(nanos)
			.map(Duration::from_nanos)
			.map_err(|_| format!("invalid duration {raw:?}: must not be negative"))
	}
}

pub mod serde_dur_option {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(d: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
		match d {
			Some(d) => super::serde_dur::serialize(d, serializer),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(
		deserializer: D,
	) -> Result<Option<Duration>, D::Error> {
		let raw = Option::<String>::deserialize(deserializer)?;
		raw
			.map(|raw| super::serde_dur::parse(&raw).map_err(serde::de::Error::custom))
			.transpose()
	}
}
