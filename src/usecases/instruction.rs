//! Instruction Encoding - Venue Calls from a Function Signature
//!
//! Turns a human-readable signature such as
//! `executeCloseMarket(address,uint256,bytes,uint256,bytes)` plus string
//! arguments into calldata for one signer. Two arguments are filled in
//! per attempt: `@signer` becomes the sending signer's address and
//! `@proof` becomes the proof fetched for the relay.

use alloy::dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier};
use alloy::json_abi::Function;
use alloy::primitives::{Address, Bytes};
use thiserror::Error;

/// Argument replaced by the address of the signer sending the call.
pub const SIGNER_ARG: &str = "@signer";
/// Argument replaced by the fetched proof.
pub const PROOF_ARG: &str = "@proof";

/// Errors building venue calldata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstructionError {
  #[error("invalid function signature: {0}")]
  Signature(String),

  #[error("{function} takes {expected} arguments, got {got}")]
  Arity {
    function: String,
    expected: usize,
    got: usize,
  },

  #[error("argument {index} ({ty}): {reason}")]
  Argument {
    index: usize,
    ty: String,
    reason: String,
  },

  #[error("call expects @proof but no proof was supplied")]
  ProofMissing,

  #[error("encoding failed: {0}")]
  Encode(String),
}

#[derive(Debug, Clone)]
enum Slot {
  Fixed(DynSolValue),
  Signer,
  Proof,
}

/// A parsed venue call with its per-attempt arguments left open.
#[derive(Debug, Clone)]
pub struct CallTemplate {
  function: Function,
  slots: Vec<Slot>,
}

impl CallTemplate {
  /// Parse `signature` and coerce every literal argument up front.
  ///
  /// # Errors
  /// A bad signature, an argument count mismatch, a placeholder on a
  /// parameter of the wrong type, or a literal that does not coerce.
  pub fn parse(signature: &str, args: &[String]) -> Result<Self, InstructionError> {
    let function =
      Function::parse(signature.trim()).map_err(|e| InstructionError::Signature(e.to_string()))?;

    if function.inputs.len() != args.len() {
      return Err(InstructionError::Arity {
        function: function.signature(),
        expected: function.inputs.len(),
        got: args.len(),
      });
    }

    let slots = function
      .inputs
      .iter()
      .zip(args)
      .enumerate()
      .map(|(index, (param, arg))| {
        let ty = param.resolve().map_err(|e| InstructionError::Argument {
          index,
          ty: param.ty.clone(),
          reason: e.to_string(),
        })?;
        slot_for(index, &param.ty, &ty, arg.trim())
      })
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Self { function, slots })
  }

  /// Canonical signature, e.g. `transfer(address,uint256)`.
  pub fn signature(&self) -> String {
    self.function.signature()
  }

  /// Whether one of the arguments is `@proof`.
  pub fn needs_proof(&self) -> bool {
    self.slots.iter().any(|slot| matches!(slot, Slot::Proof))
  }

  /// Selector-prefixed calldata as sent by `signer`.
  ///
  /// # Errors
  /// [`InstructionError::ProofMissing`] if the call takes `@proof` and
  /// `proof` is `None`.
  pub fn encode(&self, signer: Address, proof: Option<&Bytes>) -> Result<Bytes, InstructionError> {
    let values = self
      .slots
      .iter()
      .map(|slot| match slot {
        Slot::Fixed(value) => Ok(value.clone()),
        Slot::Signer => Ok(DynSolValue::Address(signer)),
        Slot::Proof => proof
          .map(|p| DynSolValue::Bytes(p.to_vec()))
          .ok_or(InstructionError::ProofMissing),
      })
      .collect::<Result<Vec<_>, _>>()?;

    self
      .function
      .abi_encode_input(&values)
      .map(Bytes::from)
      .map_err(|e| InstructionError::Encode(e.to_string()))
  }
}

fn slot_for(index: usize, name: &str, ty: &DynSolType, arg: &str) -> Result<Slot, InstructionError> {
  let mismatch = |reason: String| InstructionError::Argument {
    index,
    ty: name.to_string(),
    reason,
  };

  match arg {
    SIGNER_ARG if *ty == DynSolType::Address => Ok(Slot::Signer),
    SIGNER_ARG => Err(mismatch("@signer needs an address parameter".into())),
    PROOF_ARG if *ty == DynSolType::Bytes => Ok(Slot::Proof),
    PROOF_ARG => Err(mismatch("@proof needs a bytes parameter".into())),
    literal => ty
      .coerce_str(literal)
      .map(Slot::Fixed)
      .map_err(|e| mismatch(e.to_string())),
  }
}
