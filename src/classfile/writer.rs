//! Deterministic class-file serialization.
//!
//! Serialization works on a clone of the class's constant pool: every name,
//! descriptor and attribute label is interned into the clone, labels are
//! resolved to byte offsets in a single forward pass (switch padding depends
//! only on earlier offsets), and `max_stack`/`max_locals`/`StackMapTable` are
//! recomputed per body by frame analysis. Two serializations of the same
//! class therefore yield identical bytes.

use super::class::ClassFile;
use super::code::{
    ArithOp, CmpKind, Code, ExceptionHandler, IfCond, Insn, InvokeKind, Label, SlotType,
};
use super::constpool::{Constant, ConstantPool};
use super::defs::MAGIC;
use super::descriptor::MethodType;
use super::field::FieldInfo;
use super::frame::{self, Frame};
use super::method::MethodInfo;
use super::opcodes::*;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Serializes a class to classfile bytes.
pub fn class_file_to_bytes(class: &ClassFile) -> Result<Vec<u8>> {
    let mut pool = class.pool.clone();

    let this_class = pool.class(&class.name)?;
    let super_class = match &class.superclass {
        Some(name) => pool.class(name)?,
        None => 0,
    };
    let interfaces: Vec<u16> =
        class.interfaces.iter().map(|name| pool.class(name)).collect::<Result<_>>()?;

    let mut field_bytes = Vec::new();
    for field in &class.fields {
        field_bytes.extend(field_to_bytes(field, &mut pool)?);
    }

    let mut method_bytes = Vec::new();
    for method in &class.methods {
        method_bytes.extend(method_to_bytes(class, method, &mut pool)?);
    }

    let mut attributes: Vec<Vec<u8>> = Vec::new();
    if let Some(source_file) = &class.source_file {
        let value = pool.utf8(source_file)?;
        attributes.push(attribute(&mut pool, "SourceFile", value.to_be_bytes().to_vec())?);
    }
    if let Some(signature) = &class.generic_signature {
        let value = pool.utf8(signature)?;
        attributes.push(attribute(&mut pool, "Signature", value.to_be_bytes().to_vec())?);
    }
    if !class.bootstrap_methods.is_empty() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(class.bootstrap_methods.len() as u16).to_be_bytes());
        for bm in &class.bootstrap_methods {
            payload.extend_from_slice(&bm.method_ref.to_be_bytes());
            payload.extend_from_slice(&(bm.args.len() as u16).to_be_bytes());
            for arg in &bm.args {
                payload.extend_from_slice(&arg.to_be_bytes());
            }
        }
        attributes.push(attribute(&mut pool, "BootstrapMethods", payload)?);
    }

    // the pool is complete only now, so assembly comes last
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&MAGIC.to_be_bytes());
    bytes.extend_from_slice(&class.minor_version.to_be_bytes());
    bytes.extend_from_slice(&class.major_version.to_be_bytes());
    bytes.extend(pool.to_bytes());
    bytes.extend_from_slice(&class.access_flags.to_be_bytes());
    bytes.extend_from_slice(&this_class.to_be_bytes());
    bytes.extend_from_slice(&super_class.to_be_bytes());
    bytes.extend_from_slice(&(interfaces.len() as u16).to_be_bytes());
    for interface in interfaces {
        bytes.extend_from_slice(&interface.to_be_bytes());
    }
    bytes.extend_from_slice(&(class.fields.len() as u16).to_be_bytes());
    bytes.extend(field_bytes);
    bytes.extend_from_slice(&(class.methods.len() as u16).to_be_bytes());
    bytes.extend(method_bytes);
    bytes.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
    for attr in attributes {
        bytes.extend(attr);
    }
    Ok(bytes)
}

/// Wraps an attribute payload with its interned name and length.
fn attribute(pool: &mut ConstantPool, name: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
    let name_index = pool.utf8(name)?;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&name_index.to_be_bytes());
    bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    bytes.extend(payload);
    Ok(bytes)
}

fn field_to_bytes(field: &FieldInfo, pool: &mut ConstantPool) -> Result<Vec<u8>> {
    let name = pool.utf8(&field.name)?;
    let descriptor = pool.utf8(&field.descriptor())?;
    let mut attributes = Vec::new();
    if let Some(signature) = &field.generic_signature {
        let value = pool.utf8(signature)?;
        attributes.push(attribute(pool, "Signature", value.to_be_bytes().to_vec())?);
    }
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&field.access_flags.to_be_bytes());
    bytes.extend_from_slice(&name.to_be_bytes());
    bytes.extend_from_slice(&descriptor.to_be_bytes());
    bytes.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
    for attr in attributes {
        bytes.extend(attr);
    }
    Ok(bytes)
}

fn method_to_bytes(class: &ClassFile, method: &MethodInfo, pool: &mut ConstantPool) -> Result<Vec<u8>> {
    let name = pool.utf8(&method.name)?;
    let descriptor = pool.utf8(&method.descriptor.descriptor())?;
    let mut attributes = Vec::new();
    if let Some(code) = &method.code {
        let payload = code_attribute(class, method, code, pool)?;
        attributes.push(attribute(pool, "Code", payload)?);
    }
    if !method.exceptions.is_empty() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(method.exceptions.len() as u16).to_be_bytes());
        for thrown in &method.exceptions {
            let class_index = pool.class(thrown)?;
            payload.extend_from_slice(&class_index.to_be_bytes());
        }
        attributes.push(attribute(pool, "Exceptions", payload)?);
    }
    if let Some(signature) = &method.generic_signature {
        let value = pool.utf8(signature)?;
        attributes.push(attribute(pool, "Signature", value.to_be_bytes().to_vec())?);
    }
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&method.access_flags.to_be_bytes());
    bytes.extend_from_slice(&name.to_be_bytes());
    bytes.extend_from_slice(&descriptor.to_be_bytes());
    bytes.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
    for attr in attributes {
        bytes.extend(attr);
    }
    Ok(bytes)
}

fn code_attribute(
    class: &ClassFile,
    method: &MethodInfo,
    code: &Code,
    pool: &mut ConstantPool,
) -> Result<Vec<u8>> {
    let analysis = frame::analyze(class, method)?;

    // forward pass: byte offset of every instruction and label
    let mut offset = 0u32;
    let mut insn_offsets = Vec::with_capacity(code.insns.len());
    let mut labels: HashMap<Label, u16> = HashMap::new();
    let mut new_offsets: HashMap<usize, u16> = HashMap::new();
    for (i, insn) in code.insns.iter().enumerate() {
        if offset > u16::MAX as u32 {
            return Err(Error::codegen_error(format!("method {} exceeds the bytecode size limit", method.name)));
        }
        insn_offsets.push(offset as u16);
        match insn {
            Insn::Label(label) => {
                labels.insert(*label, offset as u16);
            }
            Insn::New(_) => {
                new_offsets.insert(i, offset as u16);
            }
            _ => {}
        }
        offset += insn_size(insn, offset, pool)? as u32;
    }
    let code_length = offset;
    if code_length > u16::MAX as u32 {
        return Err(Error::codegen_error(format!("method {} exceeds the bytecode size limit", method.name)));
    }

    let mut body = Vec::with_capacity(code_length as usize);
    for (i, insn) in code.insns.iter().enumerate() {
        emit_insn(insn, insn_offsets[i], &labels, pool, &mut body)?;
    }
    debug_assert_eq!(body.len() as u32, code_length);

    let resolve = |label: Label| -> Result<u16> {
        labels
            .get(&label)
            .copied()
            .ok_or_else(|| Error::codegen_error(format!("reference to undefined label {label}")))
    };

    let mut payload = Vec::new();
    payload.extend_from_slice(&analysis.max_stack.to_be_bytes());
    payload.extend_from_slice(&analysis.max_locals.to_be_bytes());
    payload.extend_from_slice(&code_length.to_be_bytes());
    payload.extend(&body);
    payload.extend_from_slice(&(code.handlers.len() as u16).to_be_bytes());
    for ExceptionHandler { start, end, handler, catch_type } in &code.handlers {
        payload.extend_from_slice(&resolve(*start)?.to_be_bytes());
        payload.extend_from_slice(&resolve(*end)?.to_be_bytes());
        payload.extend_from_slice(&resolve(*handler)?.to_be_bytes());
        payload.extend_from_slice(&catch_type.unwrap_or(0).to_be_bytes());
    }

    let mut attributes = Vec::new();
    let stack_map = stack_map_table(code, &analysis.frames, &labels, &new_offsets, pool)?;
    if let Some(payload) = stack_map {
        attributes.push(attribute(pool, "StackMapTable", payload)?);
    }
    if !code.line_numbers.is_empty() {
        let entries: Vec<(u16, u16)> = code
            .line_numbers
            .iter()
            .filter_map(|(label, line)| labels.get(label).map(|&pc| (pc, *line)))
            .collect();
        let mut table = Vec::new();
        table.extend_from_slice(&(entries.len() as u16).to_be_bytes());
        for (pc, line) in entries {
            table.extend_from_slice(&pc.to_be_bytes());
            table.extend_from_slice(&line.to_be_bytes());
        }
        attributes.push(attribute(pool, "LineNumberTable", table)?);
    }
    if !code.local_variables.is_empty() {
        let mut table = Vec::new();
        table.extend_from_slice(&(code.local_variables.len() as u16).to_be_bytes());
        for var in &code.local_variables {
            let name = pool.utf8(&var.name)?;
            let descriptor = pool.utf8(&var.descriptor)?;
            table.extend_from_slice(&0u16.to_be_bytes());
            table.extend_from_slice(&(code_length as u16).to_be_bytes());
            table.extend_from_slice(&name.to_be_bytes());
            table.extend_from_slice(&descriptor.to_be_bytes());
            table.extend_from_slice(&var.slot.to_be_bytes());
        }
        attributes.push(attribute(pool, "LocalVariableTable", table)?);
    }

    payload.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
    for attr in attributes {
        payload.extend(attr);
    }
    Ok(payload)
}

/// Emits full frames at every referenced, reachable label, sorted by offset.
fn stack_map_table(
    code: &Code,
    frames: &std::collections::BTreeMap<Label, Frame>,
    labels: &HashMap<Label, u16>,
    new_offsets: &HashMap<usize, u16>,
    pool: &mut ConstantPool,
) -> Result<Option<Vec<u8>>> {
    let mut at: Vec<(u16, &Frame)> = Vec::new();
    for label in code.referenced_labels() {
        let (Some(&offset), Some(frame)) = (labels.get(&label), frames.get(&label)) else {
            continue;
        };
        at.push((offset, frame));
    }
    at.sort_by_key(|(offset, _)| *offset);
    at.dedup_by_key(|(offset, _)| *offset);
    if at.is_empty() {
        return Ok(None);
    }

    let mut payload = Vec::new();
    payload.extend_from_slice(&(at.len() as u16).to_be_bytes());
    let mut previous: Option<u16> = None;
    for (offset, frame) in at {
        let delta = match previous {
            None => offset,
            Some(prev) => offset - prev - 1,
        };
        previous = Some(offset);
        payload.push(255); // full_frame
        payload.extend_from_slice(&delta.to_be_bytes());
        let locals = frame.compressed_locals();
        payload.extend_from_slice(&(locals.len() as u16).to_be_bytes());
        for ty in locals {
            payload.extend(ty.to_bytes(pool, new_offsets)?);
        }
        payload.extend_from_slice(&(frame.stack.len() as u16).to_be_bytes());
        for ty in &frame.stack {
            payload.extend(ty.to_bytes(pool, new_offsets)?);
        }
    }
    Ok(Some(payload))
}

fn type_offset(slot: SlotType) -> Result<u8> {
    Ok(match slot {
        SlotType::Int => 0,
        SlotType::Long => 1,
        SlotType::Float => 2,
        SlotType::Double => 3,
        SlotType::Ref => return Err(Error::codegen_error("reference type in numeric instruction")),
    })
}

/// Offset used by load/store/array/return opcode families, where references
/// come after the four numeric types.
fn move_offset(slot: SlotType) -> u8 {
    match slot {
        SlotType::Int => 0,
        SlotType::Long => 1,
        SlotType::Float => 2,
        SlotType::Double => 3,
        SlotType::Ref => 4,
    }
}

fn switch_padding(offset: u32) -> u32 {
    (4 - ((offset + 1) % 4)) % 4
}

/// The encoded size of an instruction placed at the given byte offset.
/// Constants that will be loaded from the pool are interned here, so the
/// emission pass below sees the same indices.
fn insn_size(insn: &Insn, offset: u32, pool: &mut ConstantPool) -> Result<u16> {
    Ok(match insn {
        Insn::Label(_) => 0,
        Insn::Iconst(v) => match *v {
            -1..=5 => 1,
            v if i8::try_from(v).is_ok() => 2,
            v if i16::try_from(v).is_ok() => 3,
            v => ldc_size(pool.integer(v)?),
        },
        Insn::Lconst(v) => match *v {
            0 | 1 => 1,
            v => {
                pool.long(v)?;
                3
            }
        },
        Insn::Fconst(v) => {
            if [0.0f32, 1.0, 2.0].iter().any(|c| c.to_bits() == v.to_bits()) {
                1
            } else {
                ldc_size(pool.float(*v)?)
            }
        }
        Insn::Dconst(v) => {
            if [0.0f64, 1.0].iter().any(|c| c.to_bits() == v.to_bits()) {
                1
            } else {
                pool.double(*v)?;
                3
            }
        }
        Insn::Ldc(index) => {
            if matches!(pool.get(*index), Some(Constant::Long(_) | Constant::Double(_))) {
                3
            } else {
                ldc_size(*index)
            }
        }
        Insn::Load(_, slot) | Insn::Store(_, slot) => match *slot {
            0..=3 => 1,
            4..=255 => 2,
            _ => 4, // wide form
        },
        Insn::Iinc(index, delta) => {
            if *index <= 255 && i8::try_from(*delta).is_ok() {
                3
            } else {
                6 // wide form
            }
        }
        Insn::If(..) | Insn::Goto(_) => 3,
        Insn::Switch { cases, .. } => {
            (1 + switch_padding(offset) + 8 + 8 * cases.len() as u32) as u16
        }
        Insn::GetStatic(_)
        | Insn::PutStatic(_)
        | Insn::GetField(_)
        | Insn::PutField(_)
        | Insn::New(_)
        | Insn::ANewArray(_)
        | Insn::Checkcast(_)
        | Insn::InstanceOf(_) => 3,
        Insn::Invoke(InvokeKind::Interface, _) | Insn::InvokeDynamic(_) => 5,
        Insn::Invoke(..) => 3,
        Insn::NewArray(_) => 2,
        Insn::MultiANewArray(..) => 4,
        _ => 1,
    })
}

fn ldc_size(index: u16) -> u16 {
    if index <= 255 {
        2
    } else {
        3
    }
}

fn emit_insn(
    insn: &Insn,
    offset: u16,
    labels: &HashMap<Label, u16>,
    pool: &mut ConstantPool,
    out: &mut Vec<u8>,
) -> Result<()> {
    let branch = |target: Label| -> Result<[u8; 2]> {
        let target_offset = *labels
            .get(&target)
            .ok_or_else(|| Error::codegen_error(format!("branch to undefined label {target}")))?;
        let relative = target_offset as i32 - offset as i32;
        let relative = i16::try_from(relative)
            .map_err(|_| Error::codegen_error(format!("branch offset {relative} out of range")))?;
        Ok(relative.to_be_bytes())
    };

    match insn {
        Insn::Label(_) => {}
        Insn::Nop => out.push(NOP),
        Insn::AconstNull => out.push(ACONST_NULL),
        Insn::Iconst(v) => match *v {
            -1..=5 => out.push((ICONST_0 as i32 + v) as u8),
            v if i8::try_from(v).is_ok() => {
                out.push(BIPUSH);
                out.push(v as i8 as u8);
            }
            v if i16::try_from(v).is_ok() => {
                out.push(SIPUSH);
                out.extend_from_slice(&(v as i16).to_be_bytes());
            }
            v => emit_ldc(pool.integer(v)?, out),
        },
        Insn::Lconst(v) => match *v {
            0 | 1 => out.push(LCONST_0 + *v as u8),
            v => {
                out.push(LDC2_W);
                out.extend_from_slice(&pool.long(v)?.to_be_bytes());
            }
        },
        Insn::Fconst(v) => {
            let matched = [0.0f32, 1.0, 2.0]
                .iter()
                .position(|c| c.to_bits() == v.to_bits());
            match matched {
                Some(n) => out.push(FCONST_0 + n as u8),
                None => emit_ldc(pool.float(*v)?, out),
            }
        }
        Insn::Dconst(v) => {
            let matched = [0.0f64, 1.0].iter().position(|c| c.to_bits() == v.to_bits());
            match matched {
                Some(n) => out.push(DCONST_0 + n as u8),
                None => {
                    out.push(LDC2_W);
                    out.extend_from_slice(&pool.double(*v)?.to_be_bytes());
                }
            }
        }
        Insn::Ldc(index) => {
            if matches!(pool.get(*index), Some(Constant::Long(_) | Constant::Double(_))) {
                out.push(LDC2_W);
                out.extend_from_slice(&index.to_be_bytes());
            } else {
                emit_ldc(*index, out);
            }
        }
        Insn::Load(ty, slot) => emit_move(ILOAD, ILOAD_0, *ty, *slot, out),
        Insn::Store(ty, slot) => emit_move(ISTORE, ISTORE_0, *ty, *slot, out),
        Insn::Iinc(index, delta) => {
            if *index <= 255 && i8::try_from(*delta).is_ok() {
                out.push(IINC);
                out.push(*index as u8);
                out.push(*delta as i8 as u8);
            } else {
                out.push(WIDE);
                out.push(IINC);
                out.extend_from_slice(&index.to_be_bytes());
                out.extend_from_slice(&delta.to_be_bytes());
            }
        }
        Insn::ArrayLoad(ty) => out.push(IALOAD + move_offset(*ty)),
        Insn::ArrayStore(ty) => out.push(IASTORE + move_offset(*ty)),
        Insn::Pop => out.push(POP),
        Insn::Pop2 => out.push(POP2),
        Insn::Dup => out.push(DUP),
        Insn::DupX1 => out.push(DUP_X1),
        Insn::Dup2 => out.push(DUP2),
        Insn::Swap => out.push(SWAP),
        Insn::Arith(ty, op) => out.push(arith_opcode(*ty, *op)?),
        Insn::Convert(from, to) => out.push(convert_opcode(*from, *to)?),
        Insn::Cmp(kind) => out.push(match kind {
            CmpKind::LCmp => LCMP,
            CmpKind::FCmpL => FCMPL,
            CmpKind::FCmpG => FCMPG,
            CmpKind::DCmpL => DCMPL,
            CmpKind::DCmpG => DCMPG,
        }),
        Insn::If(cond, target) => {
            out.push(if_opcode(*cond));
            let rel = branch(*target)?;
            out.extend_from_slice(&rel);
        }
        Insn::Goto(target) => {
            out.push(GOTO);
            let rel = branch(*target)?;
            out.extend_from_slice(&rel);
        }
        Insn::Switch { default, cases } => {
            out.push(LOOKUPSWITCH);
            for _ in 0..switch_padding(offset as u32) {
                out.push(0);
            }
            let default_offset = *labels
                .get(default)
                .ok_or_else(|| Error::codegen_error(format!("branch to undefined label {default}")))?;
            out.extend_from_slice(&(default_offset as i32 - offset as i32).to_be_bytes());
            let mut sorted = cases.clone();
            sorted.sort_by_key(|(key, _)| *key);
            out.extend_from_slice(&(sorted.len() as i32).to_be_bytes());
            for (key, target) in sorted {
                let target_offset = *labels.get(&target).ok_or_else(|| {
                    Error::codegen_error(format!("branch to undefined label {target}"))
                })?;
                out.extend_from_slice(&key.to_be_bytes());
                out.extend_from_slice(&(target_offset as i32 - offset as i32).to_be_bytes());
            }
        }
        Insn::Return(None) => out.push(RETURN),
        Insn::Return(Some(ty)) => out.push(IRETURN + move_offset(*ty)),
        Insn::GetStatic(index) => emit_ref(GETSTATIC, *index, out),
        Insn::PutStatic(index) => emit_ref(PUTSTATIC, *index, out),
        Insn::GetField(index) => emit_ref(GETFIELD, *index, out),
        Insn::PutField(index) => emit_ref(PUTFIELD, *index, out),
        Insn::Invoke(InvokeKind::Interface, index) => {
            out.push(INVOKEINTERFACE);
            out.extend_from_slice(&index.to_be_bytes());
            let (_, _, descriptor) = pool.method_ref_at(*index)?;
            let count = 1 + MethodType::parse(descriptor)?.arg_slots();
            out.push(u8::try_from(count).map_err(|_| Error::codegen_error("interface call with too many argument slots"))?);
            out.push(0);
        }
        Insn::Invoke(kind, index) => {
            out.push(match kind {
                InvokeKind::Virtual => INVOKEVIRTUAL,
                InvokeKind::Special => INVOKESPECIAL,
                InvokeKind::Static => INVOKESTATIC,
                InvokeKind::Interface => unreachable!(),
            });
            out.extend_from_slice(&index.to_be_bytes());
        }
        Insn::InvokeDynamic(index) => {
            out.push(INVOKEDYNAMIC);
            out.extend_from_slice(&index.to_be_bytes());
            out.push(0);
            out.push(0);
        }
        Insn::New(index) => emit_ref(NEW, *index, out),
        Insn::NewArray(atype) => {
            out.push(NEWARRAY);
            out.push(*atype);
        }
        Insn::ANewArray(index) => emit_ref(ANEWARRAY, *index, out),
        Insn::MultiANewArray(index, dims) => {
            out.push(MULTIANEWARRAY);
            out.extend_from_slice(&index.to_be_bytes());
            out.push(*dims);
        }
        Insn::ArrayLength => out.push(ARRAYLENGTH),
        Insn::Checkcast(index) => emit_ref(CHECKCAST, *index, out),
        Insn::InstanceOf(index) => emit_ref(INSTANCEOF, *index, out),
        Insn::Athrow => out.push(ATHROW),
        Insn::MonitorEnter => out.push(MONITORENTER),
        Insn::MonitorExit => out.push(MONITOREXIT),
    }
    Ok(())
}

fn emit_ldc(index: u16, out: &mut Vec<u8>) {
    if index <= 255 {
        out.push(LDC);
        out.push(index as u8);
    } else {
        out.push(LDC_W);
        out.extend_from_slice(&index.to_be_bytes());
    }
}

fn emit_ref(opcode: u8, index: u16, out: &mut Vec<u8>) {
    out.push(opcode);
    out.extend_from_slice(&index.to_be_bytes());
}

fn emit_move(base: u8, base_short: u8, ty: SlotType, slot: u16, out: &mut Vec<u8>) {
    let opcode = base + move_offset(ty);
    match slot {
        0..=3 => out.push(base_short + 4 * move_offset(ty) + slot as u8),
        4..=255 => {
            out.push(opcode);
            out.push(slot as u8);
        }
        _ => {
            out.push(WIDE);
            out.push(opcode);
            out.extend_from_slice(&slot.to_be_bytes());
        }
    }
}

fn arith_opcode(ty: SlotType, op: ArithOp) -> Result<u8> {
    let offset = type_offset(ty)?;
    let long_only = |base: u8| -> Result<u8> {
        match ty {
            SlotType::Int => Ok(base),
            SlotType::Long => Ok(base + 1),
            _ => Err(Error::codegen_error("logical instruction on a non-integral type")),
        }
    };
    Ok(match op {
        ArithOp::Add => IADD + offset,
        ArithOp::Sub => ISUB + offset,
        ArithOp::Mul => IMUL + offset,
        ArithOp::Div => IDIV + offset,
        ArithOp::Rem => IREM + offset,
        ArithOp::Neg => INEG + offset,
        ArithOp::Shl => long_only(ISHL)?,
        ArithOp::Shr => long_only(ISHR)?,
        ArithOp::Ushr => long_only(IUSHR)?,
        ArithOp::And => long_only(IAND)?,
        ArithOp::Or => long_only(IOR)?,
        ArithOp::Xor => long_only(IXOR)?,
    })
}

fn convert_opcode(from: SlotType, to: SlotType) -> Result<u8> {
    use SlotType::*;
    Ok(match (from, to) {
        (Int, Long) => I2L,
        (Int, Float) => I2F,
        (Int, Double) => I2D,
        (Long, Int) => L2I,
        (Long, Float) => L2F,
        (Long, Double) => L2D,
        (Float, Int) => F2I,
        (Float, Long) => F2L,
        (Float, Double) => F2D,
        (Double, Int) => D2I,
        (Double, Long) => D2L,
        (Double, Float) => D2F,
        (from, to) => {
            return Err(Error::codegen_error(format!("no conversion from {from:?} to {to:?}")))
        }
    })
}

fn if_opcode(cond: IfCond) -> u8 {
    match cond {
        IfCond::Eq => IFEQ,
        IfCond::Ne => IFNE,
        IfCond::Lt => IFLT,
        IfCond::Ge => IFGE,
        IfCond::Gt => IFGT,
        IfCond::Le => IFLE,
        IfCond::ICmpEq => IF_ICMPEQ,
        IfCond::ICmpNe => IF_ICMPNE,
        IfCond::ICmpLt => IF_ICMPLT,
        IfCond::ICmpGe => IF_ICMPGE,
        IfCond::ICmpGt => IF_ICMPGT,
        IfCond::ICmpLe => IF_ICMPLE,
        IfCond::ACmpEq => IF_ACMPEQ,
        IfCond::ACmpNe => IF_ACMPNE,
        IfCond::Null => IFNULL,
        IfCond::NonNull => IFNONNULL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::defs::access_flags::*;

    fn empty_void_method(name: &str) -> MethodInfo {
        let mut code = Code::new();
        code.push(Insn::Return(None));
        MethodInfo::new(ACC_PUBLIC | ACC_STATIC, name, MethodType::parse("()V").unwrap(), code)
    }

    #[test]
    fn test_minimal_class_serializes() {
        let mut class = ClassFile::new("test/Min", "java/lang/Object");
        class.methods.push(empty_void_method("run"));
        let bytes = class_file_to_bytes(&class).unwrap();
        assert_eq!(&bytes[0..4], &MAGIC.to_be_bytes());
        assert_eq!(&bytes[6..8], &class.major_version.to_be_bytes());
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let mut class = ClassFile::new("test/Det", "java/lang/Object");
        class.methods.push(empty_void_method("a"));
        class.methods.push(empty_void_method("b"));
        assert_eq!(class_file_to_bytes(&class).unwrap(), class_file_to_bytes(&class).unwrap());
    }

    #[test]
    fn test_branches_resolve() {
        let mut class = ClassFile::new("test/Br", "java/lang/Object");
        let mut code = Code::new();
        let end = code.fresh_label();
        code.extend([
            Insn::Load(SlotType::Int, 0),
            Insn::If(IfCond::Ge, end),
            Insn::Iconst(0),
            Insn::Return(Some(SlotType::Int)),
            Insn::Label(end),
            Insn::Iconst(1),
            Insn::Return(Some(SlotType::Int)),
        ]);
        class.methods.push(MethodInfo::new(
            ACC_STATIC,
            "sign",
            MethodType::parse("(I)I").unwrap(),
            code,
        ));
        let bytes = class_file_to_bytes(&class).unwrap();
        // iload_0 is 0x1a; ifge at offset 1 jumps +5 to the label at 6
        let window = [0x1a, IFGE, 0x00, 0x05];
        assert!(bytes.windows(window.len()).any(|w| w == window));
    }

    #[test]
    fn test_branch_to_missing_label_is_rejected() {
        let mut class = ClassFile::new("test/Bad", "java/lang/Object");
        let mut code = Code::new();
        code.extend([Insn::Goto(9), Insn::Return(None)]);
        class.methods.push(MethodInfo::new(
            ACC_STATIC,
            "run",
            MethodType::parse("()V").unwrap(),
            code,
        ));
        assert!(class_file_to_bytes(&class).is_err());
    }
}
