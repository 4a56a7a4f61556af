//! Structural recomputation of method bodies.
//!
//! The rewriting passes change stack depths, local numbering and control
//! flow, so `max_stack`, `max_locals` and the `StackMapTable` of the original
//! body are stale by the time a class is serialized. This module recomputes
//! all three by abstract interpretation over the structured instruction list:
//! a dataflow fixpoint propagates typed frames through the body and records a
//! full frame at every label, from which the writer emits stack map entries
//! for the labels that branches and handlers actually reference.

use super::class::ClassFile;
use super::code::{ArithOp, CmpKind, Code, IfCond, Insn, Label, SlotType};
use super::constpool::{Constant, ConstantPool};
use super::defs::CONSTRUCTOR_METHOD_NAME;
use super::descriptor::{JvmType, MethodType};
use super::method::MethodInfo;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// A verification type, as it appears in stack map frames (JVMS 4.7.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// A reference of the given internal class or array-descriptor name.
    Object(String),
    /// A freshly allocated object; the payload is the index of its `new`
    /// instruction in the instruction list.
    Uninitialized(usize),
}

impl VerificationType {
    fn of(ty: &JvmType) -> Self {
        match ty {
            JvmType::Long => VerificationType::Long,
            JvmType::Float => VerificationType::Float,
            JvmType::Double => VerificationType::Double,
            JvmType::Object(name) => VerificationType::Object(name.clone()),
            JvmType::Array(_) => VerificationType::Object(ty.descriptor()),
            _ => VerificationType::Integer,
        }
    }

    fn of_slot(slot: SlotType) -> Self {
        match slot {
            SlotType::Int => VerificationType::Integer,
            SlotType::Long => VerificationType::Long,
            SlotType::Float => VerificationType::Float,
            SlotType::Double => VerificationType::Double,
            SlotType::Ref => VerificationType::Object("java/lang/Object".to_string()),
        }
    }

    /// The number of local/stack slots this type occupies.
    fn width(&self) -> u16 {
        match self {
            VerificationType::Long | VerificationType::Double => 2,
            _ => 1,
        }
    }

    fn is_reference(&self) -> bool {
        matches!(
            self,
            VerificationType::Null
                | VerificationType::Object(_)
                | VerificationType::Uninitialized(_)
                | VerificationType::UninitializedThis
        )
    }

    /// Serializes this type, interning class names into the pool. The offset
    /// table maps `new` instruction indices to their byte offsets.
    pub fn to_bytes(&self, pool: &mut ConstantPool, offsets: &HashMap<usize, u16>) -> Result<Vec<u8>> {
        Ok(match self {
            VerificationType::Top => vec![0],
            VerificationType::Integer => vec![1],
            VerificationType::Float => vec![2],
            VerificationType::Double => vec![3],
            VerificationType::Long => vec![4],
            VerificationType::Null => vec![5],
            VerificationType::UninitializedThis => vec![6],
            VerificationType::Object(name) => {
                let class_index = pool.class(name)?;
                let mut bytes = vec![7];
                bytes.extend_from_slice(&class_index.to_be_bytes());
                bytes
            }
            VerificationType::Uninitialized(insn_index) => {
                let offset = offsets.get(insn_index).ok_or_else(|| {
                    Error::codegen_error("uninitialized type refers to a removed allocation")
                })?;
                let mut bytes = vec![8];
                bytes.extend_from_slice(&offset.to_be_bytes());
                bytes
            }
        })
    }
}

/// The typed state of the locals and operand stack at one program point.
/// Locals are slot-indexed; the second slot of a long or double holds `Top`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

impl Frame {
    fn push(&mut self, ty: VerificationType) {
        self.stack.push(ty);
    }

    fn pop(&mut self) -> Result<VerificationType> {
        self.stack
            .pop()
            .ok_or_else(|| Error::codegen_error("operand stack underflow during frame analysis"))
    }

    fn pop_expect_width(&mut self, width: u16) -> Result<VerificationType> {
        let ty = self.pop()?;
        if ty.width() != width {
            return Err(Error::codegen_error(format!(
                "operand of width {} found where width {width} was expected",
                ty.width()
            )));
        }
        Ok(ty)
    }

    fn set_local(&mut self, index: u16, ty: VerificationType) {
        let wide = ty.width() == 2;
        let needed = index as usize + if wide { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, VerificationType::Top);
        }
        // overwriting the low half of a wide value invalidates its high half
        if index > 0 {
            if let Some(prev) = self.locals.get_mut(index as usize - 1) {
                if prev.width() == 2 {
                    *prev = VerificationType::Top;
                }
            }
        }
        self.locals[index as usize] = ty;
        if wide {
            self.locals[index as usize + 1] = VerificationType::Top;
        }
    }

    fn local(&self, index: u16) -> Result<&VerificationType> {
        self.locals
            .get(index as usize)
            .ok_or_else(|| Error::codegen_error(format!("read of undefined local slot {index}")))
    }

    fn stack_width(&self) -> u16 {
        self.stack.iter().map(VerificationType::width).sum()
    }

    /// The locals list in stack map form: one entry per verification type,
    /// with the implicit high half of wide types elided.
    pub fn compressed_locals(&self) -> Vec<&VerificationType> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < self.locals.len() {
            let ty = &self.locals[i];
            out.push(ty);
            i += ty.width() as usize;
        }
        out
    }

    /// Merges the other frame into this one, generalizing mismatched slots.
    /// Returns true if this frame changed.
    fn merge(&mut self, other: &Frame) -> Result<bool> {
        if self.stack.len() != other.stack.len() {
            return Err(Error::codegen_error("operand stack depth mismatch at merge point"));
        }
        let mut changed = false;
        if other.locals.len() > self.locals.len() {
            self.locals.resize(other.locals.len(), VerificationType::Top);
        }
        for (i, mine) in self.locals.iter_mut().enumerate() {
            let theirs = other.locals.get(i).unwrap_or(&VerificationType::Top);
            changed |= generalize(mine, theirs);
        }
        for (mine, theirs) in self.stack.iter_mut().zip(&other.stack) {
            changed |= generalize(mine, theirs);
        }
        Ok(changed)
    }
}

/// Generalizes `mine` to cover `theirs`; returns true if `mine` changed.
fn generalize(mine: &mut VerificationType, theirs: &VerificationType) -> bool {
    if mine == theirs {
        return false;
    }
    let merged = if *mine == VerificationType::Null && theirs.is_reference() {
        theirs.clone()
    } else if *theirs == VerificationType::Null && mine.is_reference() {
        return false;
    } else if mine.is_reference() && theirs.is_reference() {
        VerificationType::Object("java/lang/Object".to_string())
    } else {
        VerificationType::Top
    };
    if *mine != merged {
        *mine = merged;
        true
    } else {
        false
    }
}

/// The result of analyzing one method body.
#[derive(Debug)]
pub struct MethodFrames {
    pub max_stack: u16,
    pub max_locals: u16,
    /// The frame at every label of the body, keyed by label.
    pub frames: BTreeMap<Label, Frame>,
}

/// Computes max stack/locals and per-label frames for a method of the given
/// class. The method must have a body.
pub fn analyze(class: &ClassFile, method: &MethodInfo) -> Result<MethodFrames> {
    let code = method
        .code
        .as_ref()
        .ok_or_else(|| Error::codegen_error(format!("method {} has no body to analyze", method.name)))?;

    let mut analysis = Analysis {
        pool: &class.pool,
        class_name: &class.name,
        code,
        label_index: label_positions(code),
        frames: BTreeMap::new(),
        worklist: Vec::new(),
        max_stack: 0,
        max_locals: method.arg_slots(),
    };

    analysis.enqueue_entry(initial_frame(class, method));
    analysis.run()?;
    analysis.seed_handlers()?;

    Ok(MethodFrames {
        max_stack: analysis.max_stack,
        max_locals: analysis.max_locals,
        frames: analysis.frames,
    })
}

fn label_positions(code: &Code) -> HashMap<Label, usize> {
    let mut positions = HashMap::new();
    for (i, insn) in code.insns.iter().enumerate() {
        if let Insn::Label(l) = insn {
            positions.insert(*l, i);
        }
    }
    positions
}

fn initial_frame(class: &ClassFile, method: &MethodInfo) -> Frame {
    let mut frame = Frame { locals: Vec::new(), stack: Vec::new() };
    let mut slot = 0u16;
    if !method.is_static() {
        let receiver = if method.name == CONSTRUCTOR_METHOD_NAME {
            VerificationType::UninitializedThis
        } else {
            VerificationType::Object(class.name.clone())
        };
        frame.set_local(0, receiver);
        slot = 1;
    }
    for param in &method.descriptor.params {
        let ty = VerificationType::of(param);
        let width = ty.width();
        frame.set_local(slot, ty);
        slot += width;
    }
    frame
}

struct Analysis<'a> {
    pool: &'a ConstantPool,
    class_name: &'a str,
    code: &'a Code,
    label_index: HashMap<Label, usize>,
    frames: BTreeMap<Label, Frame>,
    /// Instruction indices to (re)simulate from, with their entry frames.
    worklist: Vec<(usize, Frame)>,
    max_stack: u16,
    max_locals: u16,
}

impl Analysis<'_> {
    fn enqueue_entry(&mut self, frame: Frame) {
        self.worklist.push((0, frame));
    }

    /// Merges a frame into the state recorded at a label, queueing the
    /// label's block when the state is new or changed.
    fn flow_to(&mut self, label: Label, frame: &Frame) -> Result<()> {
        let position = *self
            .label_index
            .get(&label)
            .ok_or_else(|| Error::codegen_error(format!("branch to undefined label {label}")))?;
        match self.frames.get_mut(&label) {
            None => {
                self.frames.insert(label, frame.clone());
                self.worklist.push((position + 1, frame.clone()));
            }
            Some(existing) => {
                if existing.merge(frame)? {
                    let merged = existing.clone();
                    self.worklist.push((position + 1, merged));
                }
            }
        }
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        while let Some((start, frame)) = self.worklist.pop() {
            self.simulate(start, frame)?;
        }
        Ok(())
    }

    /// Exception handlers are entered with the locals of the protected
    /// region's start and a single thrown reference on the stack.
    fn seed_handlers(&mut self) -> Result<()> {
        loop {
            let mut seeded = false;
            for handler in &self.code.handlers {
                if self.frames.contains_key(&handler.handler) {
                    continue;
                }
                let Some(at_start) = self.frames.get(&handler.start) else {
                    continue;
                };
                let thrown = match handler.catch_type {
                    Some(index) => self.pool.class_name_at(index)?.to_string(),
                    None => "java/lang/Throwable".to_string(),
                };
                let entry = Frame {
                    locals: at_start.locals.clone(),
                    stack: vec![VerificationType::Object(thrown)],
                };
                self.flow_to(handler.handler, &entry)?;
                seeded = true;
                break;
            }
            if !seeded {
                return self.run();
            }
            self.run()?;
        }
    }

    /// Simulates straight-line execution from the given instruction index
    /// until the block ends, flowing frames to every reached label.
    fn simulate(&mut self, start: usize, mut frame: Frame) -> Result<()> {
        let mut i = start;
        while i < self.code.insns.len() {
            self.note_sizes(&frame);
            let insn = &self.code.insns[i];
            match insn {
                Insn::Label(label) => {
                    // fall-through into a merge point: flow_to requeues the
                    // block only if the recorded state is new or changed
                    self.flow_to(*label, &frame)?;
                    return Ok(());
                }
                Insn::If(cond, target) => {
                    self.step_if(*cond, &mut frame)?;
                    self.flow_to(*target, &frame)?;
                }
                Insn::Goto(target) => {
                    self.flow_to(*target, &frame)?;
                    return Ok(());
                }
                Insn::Switch { default, cases } => {
                    frame.pop_expect_width(1)?;
                    self.flow_to(*default, &frame)?;
                    for (_, target) in cases {
                        self.flow_to(*target, &frame)?;
                    }
                    return Ok(());
                }
                Insn::Return(_) | Insn::Athrow => return Ok(()),
                other => self.step(other, i, &mut frame)?,
            }
            i += 1;
        }
        Ok(())
    }

    fn note_sizes(&mut self, frame: &Frame) {
        self.max_stack = self.max_stack.max(frame.stack_width());
        self.max_locals = self.max_locals.max(frame.locals.len() as u16);
    }

    fn step_if(&mut self, cond: IfCond, frame: &mut Frame) -> Result<()> {
        match cond {
            IfCond::ICmpEq
            | IfCond::ICmpNe
            | IfCond::ICmpLt
            | IfCond::ICmpGe
            | IfCond::ICmpGt
            | IfCond::ICmpLe
            | IfCond::ACmpEq
            | IfCond::ACmpNe => {
                frame.pop()?;
                frame.pop()?;
            }
            _ => {
                frame.pop()?;
            }
        }
        Ok(())
    }

    /// Applies the stack/local effect of one non-branching instruction.
    fn step(&mut self, insn: &Insn, index: usize, frame: &mut Frame) -> Result<()> {
        use VerificationType as V;
        match insn {
            Insn::Label(_)
            | Insn::If(..)
            | Insn::Goto(_)
            | Insn::Switch { .. }
            | Insn::Return(_)
            | Insn::Athrow => unreachable!("handled by simulate"),
            Insn::Nop => {}
            Insn::AconstNull => frame.push(V::Null),
            Insn::Iconst(_) => frame.push(V::Integer),
            Insn::Lconst(_) => frame.push(V::Long),
            Insn::Fconst(_) => frame.push(V::Float),
            Insn::Dconst(_) => frame.push(V::Double),
            Insn::Ldc(pool_index) => frame.push(self.ldc_type(*pool_index)?),
            Insn::Load(slot, index) => {
                let ty = frame.local(*index)?.clone();
                if ty.width() != SlotType::size(*slot) {
                    return Err(Error::codegen_error(format!("typed load from mistyped local {index}")));
                }
                frame.push(ty);
            }
            Insn::Store(_, index) => {
                let ty = frame.pop()?;
                frame.set_local(*index, ty);
            }
            Insn::Iinc(index, _) => {
                frame.local(*index)?;
                self.max_locals = self.max_locals.max(*index + 1);
            }
            Insn::ArrayLoad(slot) => {
                frame.pop_expect_width(1)?; // index
                let array = frame.pop()?;
                frame.push(element_type(&array, *slot));
            }
            Insn::ArrayStore(_) => {
                frame.pop()?; // value
                frame.pop()?; // index
                frame.pop()?; // arrayref
            }
            Insn::Pop => {
                frame.pop_expect_width(1)?;
            }
            Insn::Pop2 => {
                let top = frame.pop()?;
                if top.width() == 1 {
                    frame.pop_expect_width(1)?;
                }
            }
            Insn::Dup => {
                let top = frame.pop_expect_width(1)?;
                frame.push(top.clone());
                frame.push(top);
            }
            Insn::DupX1 => {
                let top = frame.pop_expect_width(1)?;
                let under = frame.pop_expect_width(1)?;
                frame.push(top.clone());
                frame.push(under);
                frame.push(top);
            }
            Insn::Dup2 => {
                let top = frame.pop()?;
                if top.width() == 2 {
                    frame.push(top.clone());
                    frame.push(top);
                } else {
                    let under = frame.pop_expect_width(1)?;
                    frame.push(under.clone());
                    frame.push(top.clone());
                    frame.push(under);
                    frame.push(top);
                }
            }
            Insn::Swap => {
                let top = frame.pop_expect_width(1)?;
                let under = frame.pop_expect_width(1)?;
                frame.push(top);
                frame.push(under);
            }
            Insn::Arith(slot, op) => {
                let result = V::of_slot(*slot);
                match op {
                    ArithOp::Neg => {
                        frame.pop()?;
                    }
                    ArithOp::Shl | ArithOp::Shr | ArithOp::Ushr => {
                        frame.pop_expect_width(1)?; // shift amount is always int
                        frame.pop()?;
                    }
                    _ => {
                        frame.pop()?;
                        frame.pop()?;
                    }
                }
                frame.push(result);
            }
            Insn::Convert(_, to) => {
                frame.pop()?;
                frame.push(V::of_slot(*to));
            }
            Insn::Cmp(kind) => {
                match kind {
                    CmpKind::LCmp => {
                        frame.pop_expect_width(2)?;
                        frame.pop_expect_width(2)?;
                    }
                    _ => {
                        frame.pop()?;
                        frame.pop()?;
                    }
                }
                frame.push(V::Integer);
            }
            Insn::GetStatic(pool_index) => {
                let (_, _, descriptor) = self.pool.field_ref_at(*pool_index)?;
                frame.push(V::of(&JvmType::parse(descriptor)?));
            }
            Insn::PutStatic(_) => {
                frame.pop()?;
            }
            Insn::GetField(pool_index) => {
                let (_, _, descriptor) = self.pool.field_ref_at(*pool_index)?;
                frame.pop()?; // receiver
                frame.push(V::of(&JvmType::parse(descriptor)?));
            }
            Insn::PutField(_) => {
                frame.pop()?; // value
                frame.pop()?; // receiver
            }
            Insn::Invoke(kind, pool_index) => {
                let (class, name, descriptor) = self.pool.method_ref_at(*pool_index)?;
                let (class, name) = (class.to_string(), name.to_string());
                let method_type = MethodType::parse(descriptor)?;
                for _ in 0..method_type.params.len() {
                    frame.pop()?;
                }
                if kind.has_receiver() {
                    let receiver = frame.pop()?;
                    if name == CONSTRUCTOR_METHOD_NAME {
                        // a super() call initializes `this` as the class
                        // under analysis, not as the invoked superclass
                        let initialized = if receiver == VerificationType::UninitializedThis {
                            self.class_name
                        } else {
                            &class
                        };
                        initialize(frame, &receiver, initialized);
                    }
                }
                if method_type.ret != JvmType::Void {
                    frame.push(V::of(&method_type.ret));
                }
            }
            Insn::InvokeDynamic(pool_index) => {
                let (_, _, descriptor) = self.pool.invoke_dynamic_at(*pool_index)?;
                let method_type = MethodType::parse(descriptor)?;
                for _ in 0..method_type.params.len() {
                    frame.pop()?;
                }
                if method_type.ret != JvmType::Void {
                    frame.push(V::of(&method_type.ret));
                }
            }
            Insn::New(_) => frame.push(V::Uninitialized(index)),
            Insn::NewArray(atype) => {
                frame.pop_expect_width(1)?;
                let descriptor = super::code::primitive_array_descriptor(*atype).ok_or_else(|| {
                    Error::codegen_error(format!("invalid newarray type operand {atype}"))
                })?;
                frame.push(V::Object(descriptor.to_string()));
            }
            Insn::ANewArray(pool_index) => {
                frame.pop_expect_width(1)?;
                let element = self.pool.class_name_at(*pool_index)?;
                let descriptor = if element.starts_with('[') {
                    format!("[{element}")
                } else {
                    format!("[L{element};")
                };
                frame.push(V::Object(descriptor));
            }
            Insn::MultiANewArray(pool_index, dims) => {
                for _ in 0..*dims {
                    frame.pop_expect_width(1)?;
                }
                frame.push(V::Object(self.pool.class_name_at(*pool_index)?.to_string()));
            }
            Insn::ArrayLength => {
                frame.pop()?;
                frame.push(V::Integer);
            }
            Insn::Checkcast(pool_index) => {
                frame.pop()?;
                frame.push(V::Object(self.pool.class_name_at(*pool_index)?.to_string()));
            }
            Insn::InstanceOf(_) => {
                frame.pop()?;
                frame.push(V::Integer);
            }
            Insn::MonitorEnter | Insn::MonitorExit => {
                frame.pop()?;
            }
        }
        self.note_sizes(frame);
        Ok(())
    }

    fn ldc_type(&self, pool_index: u16) -> Result<VerificationType> {
        let constant = self.pool.get(pool_index).ok_or_else(|| {
            Error::codegen_error(format!("ldc of missing constant pool entry {pool_index}"))
        })?;
        Ok(match constant {
            Constant::Integer(_) => VerificationType::Integer,
            Constant::Float(_) => VerificationType::Float,
            Constant::Long(_) => VerificationType::Long,
            Constant::Double(_) => VerificationType::Double,
            Constant::String(_) => VerificationType::Object("java/lang/String".to_string()),
            Constant::Class(_) => VerificationType::Object("java/lang/Class".to_string()),
            Constant::MethodHandle(..) => {
                VerificationType::Object("java/lang/invoke/MethodHandle".to_string())
            }
            Constant::MethodType(_) => {
                VerificationType::Object("java/lang/invoke/MethodType".to_string())
            }
            other => {
                return Err(Error::codegen_error(format!("ldc of non-loadable constant {other:?}")))
            }
        })
    }
}

/// After a constructor call, every copy of the consumed uninitialized type
/// becomes the initialized class.
fn initialize(frame: &mut Frame, receiver: &VerificationType, class: &str) {
    let initialized = VerificationType::Object(class.to_string());
    for slot in frame.locals.iter_mut().chain(frame.stack.iter_mut()) {
        if slot == receiver {
            *slot = initialized.clone();
        }
    }
}

fn element_type(array: &VerificationType, slot: SlotType) -> VerificationType {
    if slot != SlotType::Ref {
        return VerificationType::of_slot(slot);
    }
    match array {
        VerificationType::Object(name) if name.starts_with('[') => {
            match JvmType::parse(&name[1..]) {
                Ok(element) if element.is_reference() => match element {
                    JvmType::Object(class) => VerificationType::Object(class),
                    arr => VerificationType::Object(arr.descriptor()),
                },
                _ => VerificationType::Object("java/lang/Object".to_string()),
            }
        }
        VerificationType::Null => VerificationType::Null,
        _ => VerificationType::Object("java/lang/Object".to_string()),
    }
}
