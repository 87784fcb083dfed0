//! Checksum calculation for migration scripts

/// Calculate the CRC-32 (IEEE) checksum of a migration script
///
/// The unsigned CRC is reinterpreted as a signed 32-bit integer so it fits the
/// `checksum INTEGER` column of the history table.
#[must_use]
pub fn calculate_checksum(sql: &str) -> i32 {
    crc32fast::hash(sql.as_bytes()) as i32
}

/// Validate a stored checksum against the current script content
///
/// Returns `true` if the script is unchanged since it was recorded. A missing
/// stored checksum never matches.
#[must_use]
pub fn checksum_matches(stored: Option<i32>, sql: &str) -> bool {
    stored == Some(calculate_checksum(sql))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_value() {
        // CRC-32/IEEE check value for "123456789" is 0xCBF43926
        assert_eq!(calculate_checksum("123456789"), 0xCBF4_3926_u32 as i32);
        assert_eq!(calculate_checksum(""), 0);
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let sql = "CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(50));";
        assert_eq!(calculate_checksum(sql), calculate_checksum(sql));
    }

    #[test]
    fn test_checksum_detects_single_byte_change() {
        let original = "CREATE TABLE users (id INT PRIMARY KEY);";
        let edited = "CREATE TABLE users (id INT PRIMARY KEY)!";
        assert_ne!(calculate_checksum(original), calculate_checksum(edited));

        let mut bytes = original.as_bytes().to_vec();
        for i in 0..bytes.len() {
            let saved = bytes[i];
            bytes[i] = saved.wrapping_add(1);
            let changed = String::from_utf8_lossy(&bytes).into_owned();
            assert_ne!(calculate_checksum(original), calculate_checksum(&changed), "byte {i}");
            bytes[i] = saved;
        }
    }

    #[test]
    fn test_checksum_can_be_negative() {
        // High bit set in the CRC maps to a negative i32
        assert!(calculate_checksum("123456789") < 0);
    }

    #[test]
    fn test_checksum_matches() {
        let sql = "ALTER TABLE users ADD COLUMN email TEXT;";
        assert!(checksum_matches(Some(calculate_checksum(sql)), sql));
        assert!(!checksum_matches(Some(calculate_checksum(sql)), "ALTER TABLE users;"));
        assert!(!checksum_matches(None, sql));
    }
}
