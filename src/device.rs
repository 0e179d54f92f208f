//! Target MCU definition, loaded from the embedded device description
use std::ops::RangeInclusive;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::constants::sio;

/// Inclusive range of flash pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    #[serde(deserialize_with = "parse_page")]
    pub start: u16,
    #[serde(deserialize_with = "parse_page")]
    pub end: u16,
}

impl PageRange {
    pub fn pages(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Represents the supported MCU
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chip {
    pub name: String,
    pub description: String,
    /// Prefix of the version reply.
    pub version_marker: String,
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub flash_size: u32,
    pub page_size: usize,
    pub code_length: usize,
    /// Fills the not yet recovered positions of a trial code.
    #[serde(deserialize_with = "parse_byte")]
    pub pad_byte: u8,
    /// Pages written by a dump.
    pub dump: PageRange,
}

impl ::std::fmt::Display for Chip {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(
            f,
            "{} (Flash: {}KiB, dump: {:04x}00-{:04x}ff)",
            self.name,
            self.flash_size / 1024,
            self.dump.start,
            self.dump.end,
        )
    }
}

impl Chip {
    pub fn load() -> Result<Self> {
        let chip: Chip = serde_yaml::from_str(include_str!("../devices/m16c62.yaml"))?;
        anyhow::ensure!(
            chip.page_size == sio::PAGE_SIZE,
            "unsupported page size {}",
            chip.page_size
        );
        anyhow::ensure!(
            chip.code_length == sio::CODE_LEN,
            "unsupported ID code length {}",
            chip.code_length
        );
        log::debug!("Loaded chip: {}", chip);
        Ok(chip)
    }

    /// Bytes produced by dumping `range`.
    pub fn dump_size(&self, range: &PageRange) -> usize {
        range.len() * self.page_size
    }
}

fn parse_number(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(k) = s.strip_suffix("KiB") {
        k.parse::<u32>().ok().map(|k| k * 1024)
    } else if let Some(k) = s.strip_suffix("KB").or_else(|| s.strip_suffix('K')) {
        k.parse::<u32>().ok().map(|k| k * 1024)
    } else {
        s.parse().ok()
    }
}

fn parse_address_and_offset<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    parse_number(&s)
        .ok_or_else(|| serde::de::Error::custom(format!("error while parsing {:?}", s)))
}

fn parse_page<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = parse_address_and_offset(deserializer)?;
    u16::try_from(value).map_err(|_| serde::de::Error::custom(format!("page {:#x} out of range", value)))
}

fn parse_byte<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = parse_address_and_offset(deserializer)?;
    u8::try_from(value).map_err(|_| serde::de::Error::custom(format!("byte {:#x} out of range", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_chip_loads() {
        let chip = Chip::load().unwrap();
        assert_eq!(chip.version_marker, "VER");
        assert_eq!(chip.pad_byte, 0xde);
        assert_eq!(chip.flash_size, 1024 * 1024);
        assert_eq!(chip.dump.start, 0x0e00);
        assert_eq!(chip.dump.end, 0x0fff);
        assert_eq!(chip.dump_size(&chip.dump), 512 * 256);
    }

    #[test]
    fn number_formats() {
        assert_eq!(parse_number("0x0E00"), Some(0x0e00));
        assert_eq!(parse_number("64K"), Some(64 * 1024));
        assert_eq!(parse_number("64KB"), Some(64 * 1024));
        assert_eq!(parse_number("12"), Some(12));
        assert_eq!(parse_number("0xZZ"), None);
    }

    #[test]
    fn inverted_range_is_empty() {
        let range = PageRange { start: 2, end: 1 };
        assert!(range.is_empty());
        assert_eq!(range.pages().count(), 0);
    }
}
