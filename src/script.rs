//! Script execution engine
//!
//! A locking script is text of the form
//! `<argument names> --- <instructions>`: the first token made only of `-`
//! separates the names an input must bind from the instruction stream.

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::oracle::check_third_party;
use crate::serialization::sha256_hex;
use crate::types::*;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;

/// One parsed instruction. Anything that is not an opcode is a literal push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Push(String),
    Dup,
    Hash,
    EqualVerify,
    CheckSig,
    CheckThirdParty,
}

impl Instruction {
    pub fn parse(token: &str) -> Self {
        match token {
            "OPDup" => Instruction::Dup,
            "OPHash" => Instruction::Hash,
            "OPEqualVerify" => Instruction::EqualVerify,
            "OPCheckSig" => Instruction::CheckSig,
            "OPCheckThirdParty" => Instruction::CheckThirdParty,
            literal => Instruction::Push(literal.to_string()),
        }
    }
}

/// A locking script split into its two sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScript {
    pub arg_names: Vec<String>,
    pub instructions: Vec<Instruction>,
}

fn is_delimiter(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c == '-')
}

/// ParseScript: 𝕊 → 𝒜* × ℐ*
///
/// Tokens are separated by any whitespace. The first all-dash token splits the
/// argument names from the instructions; a script without one is malformed.
pub fn parse_script(source: &str) -> Result<ParsedScript> {
    if source.len() > MAX_SCRIPT_SIZE {
        return Err(ConsensusError::MalformedInput(format!(
            "script of {} bytes exceeds {}",
            source.len(),
            MAX_SCRIPT_SIZE
        )));
    }

    let tokens: Vec<&str> = source.split_whitespace().collect();
    let split = tokens
        .iter()
        .position(|t| is_delimiter(t))
        .ok_or_else(|| ConsensusError::MalformedInput("script has no argument delimiter".to_string()))?;

    Ok(ParsedScript {
        arg_names: tokens[..split].iter().map(|t| t.to_string()).collect(),
        instructions: tokens[split + 1..].iter().map(|t| Instruction::parse(t)).collect(),
    })
}

/// EvalScript: ℐ* × (𝒜 → 𝕊) → {true, false}
///
/// Runs left to right over one stack of strings. Only the verify-class opcodes
/// (OPEqualVerify, OPCheckSig, OPCheckThirdParty) can fail the script; a pop
/// from an empty stack or a stack past `MAX_STACK_SIZE` also fails it. Reaching
/// the end of the instructions is success, whatever is left on the stack.
pub fn eval_script(instructions: &[Instruction], args: &ScriptArgs, ctx: &ScriptContext) -> bool {
    let mut stack: Vec<String> = Vec::new();

    for instruction in instructions {
        if !execute_instruction(instruction, &mut stack, args, ctx) {
            return false;
        }
        if stack.len() > MAX_STACK_SIZE {
            return false;
        }
    }

    true
}

/// VerifyScript: 𝕊 × (𝒜 → 𝕊) → {true, false}
///
/// Parse a locking script and evaluate it against the bound arguments. A script
/// that does not parse never authorizes a spend.
pub fn verify_script(source: &str, args: &ScriptArgs, ctx: &ScriptContext) -> bool {
    match parse_script(source) {
        Ok(script) => eval_script(&script.instructions, args, ctx),
        Err(_) => false,
    }
}

/// Execute a single instruction, false means the script failed
fn execute_instruction(
    instruction: &Instruction,
    stack: &mut Vec<String>,
    args: &ScriptArgs,
    ctx: &ScriptContext,
) -> bool {
    match instruction {
        Instruction::Push(literal) => {
            stack.push(literal.clone());
            true
        }

        // Replace a name with its bound value; unbound names become ""
        Instruction::Dup => match stack.pop() {
            Some(name) => {
                stack.push(args.get(&name).cloned().unwrap_or_default());
                true
            }
            None => false,
        },

        Instruction::Hash => match stack.pop() {
            Some(value) => {
                stack.push(op_hash(&value));
                true
            }
            None => false,
        },

        Instruction::EqualVerify => match (stack.pop(), stack.pop()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },

        Instruction::CheckSig => match (stack.pop(), stack.pop(), stack.pop()) {
            (Some(pubkey), Some(message_hash), Some(signature)) => {
                op_check_sig(&pubkey, &message_hash, &signature)
            }
            _ => false,
        },

        Instruction::CheckThirdParty => match (stack.pop(), stack.pop(), stack.pop()) {
            (Some(url), Some(path), Some(expected)) => check_third_party(ctx, &url, &path, &expected),
            _ => false,
        },
    }
}

/// OPHash: hex SHA-256 of the value's bytes
pub fn op_hash(value: &str) -> String {
    sha256_hex(value)
}

/// OPCheckSig over textual operands.
///
/// `pubkey` is a base64 encoded PEM `PUBLIC KEY` block holding an RSA key,
/// `message_hash` the hex SHA-256 digest that was signed and `signature` the
/// base64 PKCS#1 v1.5 signature. Anything that fails to decode is a failed check.
pub fn op_check_sig(pubkey: &str, message_hash: &str, signature: &str) -> bool {
    let Some(key) = decode_public_key(pubkey) else {
        return false;
    };
    let (Ok(digest), Ok(signature)) = (hex::decode(message_hash), STANDARD.decode(signature)) else {
        return false;
    };

    verify_signature(&key, &digest, &signature)
}

fn decode_public_key(encoded: &str) -> Option<RsaPublicKey> {
    let pem = STANDARD.decode(encoded).ok()?;
    let pem = std::str::from_utf8(&pem).ok()?;
    RsaPublicKey::from_public_key_pem(pem).ok()
}

/// Verify a PKCS#1 v1.5 signature over a SHA-256 digest
fn verify_signature(key: &RsaPublicKey, digest: &[u8], signature: &[u8]) -> bool {
    key.verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature).is_ok()
}
