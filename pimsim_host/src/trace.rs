//! Trace-file parsing.
//!
//! One request per line, `#` starts a comment:
//!
//! ```text
//! R 0x180 12312        # read,  address, data word
//! W 384 7              # write
//! L 384 12312          # weight load
//! C 0 0x6000000 11 X   # compute: input, output, data, slide
//! T 333 123 I 128      # transfer: address, data, mode, size in bits
//! ```

use thiserror::Error;

/// A parsed trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceCommand {
    /// READ / WRITE / LOAD_WEIGHT.
    Plain {
        /// Op letter.
        op: char,
        /// Physical byte address.
        addr: u64,
        /// Data word.
        data: u64,
    },
    /// COMPUTE pass.
    Compute {
        /// Input base address.
        input: u64,
        /// Output base address.
        output: u64,
        /// Data word.
        data: u64,
        /// Slide letter.
        slide: char,
    },
    /// TRANSFER.
    Transfer {
        /// Physical byte address.
        addr: u64,
        /// Data word.
        data: u64,
        /// Mode letter (I/O).
        mode: char,
        /// Size in bits.
        size: u64,
    },
}

/// Trace parsing error with line context.
#[derive(Debug, Clone, Error)]
pub enum TraceError {
    /// The op letter is not one of R/W/L/C/T.
    #[error("line {0}: unknown operation `{1}`")]
    UnknownOp(usize, String),
    /// Wrong field count for the op.
    #[error("line {0}: expected {1} fields")]
    FieldCount(usize, usize),
    /// A numeric field did not parse.
    #[error("line {0}: bad number `{1}`")]
    BadNumber(usize, String),
}

fn parse_u64(lineno: usize, field: &str) -> Result<u64, TraceError> {
    let parsed = match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => field.parse(),
    };
    parsed.map_err(|_| TraceError::BadNumber(lineno, field.to_string()))
}

/// Parse one line; `Ok(None)` for blanks and comments.
pub fn parse_line(lineno: usize, line: &str) -> Result<Option<TraceCommand>, TraceError> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    let op = fields[0];
    if op.len() != 1 {
        return Err(TraceError::UnknownOp(lineno, op.to_string()));
    }
    let op = op.chars().next().unwrap_or(' ');

    let command = match op.to_ascii_uppercase() {
        'R' | 'W' | 'L' => {
            if fields.len() != 3 {
                return Err(TraceError::FieldCount(lineno, 3));
            }
            TraceCommand::Plain {
                op,
                addr: parse_u64(lineno, fields[1])?,
                data: parse_u64(lineno, fields[2])?,
            }
        }
        'C' => {
            if fields.len() != 5 {
                return Err(TraceError::FieldCount(lineno, 5));
            }
            TraceCommand::Compute {
                input: parse_u64(lineno, fields[1])?,
                output: parse_u64(lineno, fields[2])?,
                data: parse_u64(lineno, fields[3])?,
                slide: fields[4].chars().next().unwrap_or(' '),
            }
        }
        'T' => {
            if fields.len() != 5 {
                return Err(TraceError::FieldCount(lineno, 5));
            }
            TraceCommand::Transfer {
                addr: parse_u64(lineno, fields[1])?,
                data: parse_u64(lineno, fields[2])?,
                mode: fields[3].chars().next().unwrap_or(' '),
                size: parse_u64(lineno, fields[4])?,
            }
        }
        _ => return Err(TraceError::UnknownOp(lineno, op.to_string())),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blanks_are_skipped() {
        assert_eq!(parse_line(1, "").unwrap(), None);
        assert_eq!(parse_line(2, "   # just a comment").unwrap(), None);
    }

    #[test]
    fn plain_ops_parse_with_hex_addresses() {
        assert_eq!(
            parse_line(1, "R 0x180 12312").unwrap(),
            Some(TraceCommand::Plain {
                op: 'R',
                addr: 0x180,
                data: 12312
            })
        );
        assert_eq!(
            parse_line(2, "w 384 7 # trailing comment").unwrap(),
            Some(TraceCommand::Plain {
                op: 'w',
                addr: 384,
                data: 7
            })
        );
    }

    #[test]
    fn compute_and_transfer_field_shapes() {
        assert_eq!(
            parse_line(1, "C 0 0x6000000 11 X").unwrap(),
            Some(TraceCommand::Compute {
                input: 0,
                output: 0x6000000,
                data: 11,
                slide: 'X'
            })
        );
        assert_eq!(
            parse_line(2, "T 333 123 I 128").unwrap(),
            Some(TraceCommand::Transfer {
                addr: 333,
                data: 123,
                mode: 'I',
                size: 128
            })
        );
        assert!(matches!(
            parse_line(3, "C 0 0"),
            Err(TraceError::FieldCount(3, 5))
        ));
    }

    #[test]
    fn bad_input_is_reported_with_line_numbers() {
        assert!(matches!(
            parse_line(7, "Q 1 2"),
            Err(TraceError::UnknownOp(7, _))
        ));
        assert!(matches!(
            parse_line(9, "R xyz 0"),
            Err(TraceError::BadNumber(9, _))
        ));
    }
}
