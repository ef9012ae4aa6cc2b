//! Maidenhead grid locators.
//!
//! A locator is read as pairs of characters, longitude first:
//! field (`A`-`R`, 20° x 10°), square (`0`-`9`, 2° x 1°) and
//! subsquare (`a`-`x`, 5' x 2.5').

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::errors::RecorderError;

const FIELDS: u32 = 18;
const SQUARES: u32 = 10;
const SUBSQUARES: u32 = 24;

/// Normalized Maidenhead locator of 2, 4 or 6 characters
///
/// Field letters are upper case, subsquare letters lower case, e.g. `FN31pr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator(String);

impl Locator {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of character pairs: 1 = field, 2 = square, 3 = subsquare
    pub fn precision(&self) -> usize {
        self.0.len() / 2
    }

    /// Cells sharing an edge or corner with this one, at the same precision.
    ///
    /// Longitude wraps at the antimeridian, latitude stops at the poles, so
    /// cells on the northern- or southernmost row have five neighbours.
    pub fn neighbors(&self) -> BTreeSet<Locator> {
        let precision = self.precision();
        let (x, y) = self.cell_index();
        let width = cells_per_axis(precision);

        let mut neighbors = BTreeSet::new();
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let ny = y as i64 + dy;
                if ny < 0 || ny >= width as i64 {
                    continue;
                }
                let nx = (x as i64 + dx).rem_euclid(width as i64);
                neighbors.insert(Self::from_cell_index(nx as u32, ny as u32, precision));
            }
        }
        neighbors.remove(self);
        neighbors
    }

    /// Latitude and longitude of the cell centre in degrees
    pub fn center(&self) -> (f64, f64) {
        let precision = self.precision();
        let (x, y) = self.cell_index();
        let (lon_size, lat_size) = match precision {
            1 => (20.0, 10.0),
            2 => (2.0, 1.0),
            _ => (2.0 / 24.0, 1.0 / 24.0),
        };
        let lon = -180.0 + (x as f64 + 0.5) * lon_size;
        let lat = -90.0 + (y as f64 + 0.5) * lat_size;
        (lat, lon)
    }

    /// Global column and row of this cell at its own precision
    fn cell_index(&self) -> (u32, u32) {
        let b = self.0.as_bytes();
        let mut x = (b[0] - b'A') as u32;
        let mut y = (b[1] - b'A') as u32;
        if b.len() >= 4 {
            x = x * SQUARES + (b[2] - b'0') as u32;
            y = y * SQUARES + (b[3] - b'0') as u32;
        }
        if b.len() >= 6 {
            x = x * SUBSQUARES + (b[4] - b'a') as u32;
            y = y * SUBSQUARES + (b[5] - b'a') as u32;
        }
        (x, y)
    }

    fn from_cell_index(x: u32, y: u32, precision: usize) -> Locator {
        let mut s = String::with_capacity(precision * 2);
        let (mut fx, mut fy) = (x, y);
        let mut tail = String::new();
        if precision >= 3 {
            tail.push((b'a' + (fx % SUBSQUARES) as u8) as char);
            tail.push((b'a' + (fy % SUBSQUARES) as u8) as char);
            fx /= SUBSQUARES;
            fy /= SUBSQUARES;
        }
        if precision >= 2 {
            tail.insert(0, (b'0' + (fy % SQUARES) as u8) as char);
            tail.insert(0, (b'0' + (fx % SQUARES) as u8) as char);
            fx /= SQUARES;
            fy /= SQUARES;
        }
        s.push((b'A' + fx as u8) as char);
        s.push((b'A' + fy as u8) as char);
        s.push_str(&tail);
        Locator(s)
    }
}

fn cells_per_axis(precision: usize) -> u32 {
    match precision {
        1 => FIELDS,
        2 => FIELDS * SQUARES,
        _ => FIELDS * SQUARES * SUBSQUARES,
    }
}

impl TryFrom<&str> for Locator {
    type Error = RecorderError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        let invalid = || RecorderError::InvalidGrid(value.to_string());

        if !trimmed.is_ascii() {
            return Err(invalid());
        }
        let len = trimmed.len();
        if len < 2 || len % 2 != 0 {
            return Err(invalid());
        }
        // Extended squares beyond the subsquare are not tracked
        let b = &trimmed.as_bytes()[..len.min(6)];

        let mut normalized = String::with_capacity(b.len());
        for (i, c) in b.iter().enumerate() {
            let c = match i {
                0 | 1 => {
                    let c = c.to_ascii_uppercase();
                    if !(b'A'..=b'R').contains(&c) {
                        return Err(invalid());
                    }
                    c
                }
                2 | 3 => {
                    if !c.is_ascii_digit() {
                        return Err(invalid());
                    }
                    *c
                }
                _ => {
                    let c = c.to_ascii_lowercase();
                    if !(b'a'..=b'x').contains(&c) {
                        return Err(invalid());
                    }
                    c
                }
            };
            normalized.push(c as char);
        }
        if len > 6 && !trimmed.as_bytes()[6..8].iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }

        Ok(Locator(normalized))
    }
}

impl FromStr for Locator {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Locator::try_from(s)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Locator {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}
