//! Gas metering and white-listing checks.
//!
//! CPU costs are aggregated per basic block and charged once at the block's
//! entry, after the leader label when the block is a branch target, so every
//! path into the block pays. RAM is charged at allocation and invocation
//! sites; array allocations move into synthesized `§alloc` methods that scale
//! the charge by the runtime length before allocating. Calls whose target
//! carries white-listing proof obligations are routed through synthesized
//! `§check` forwarders that validate the obligated values at run time.

use super::Instrumentation;
use crate::classfile::code::primitive_array_descriptor;
use crate::classfile::defs::access_flags::{ACC_PRIVATE, ACC_STATIC, ACC_SYNTHETIC};
use crate::classfile::defs::CONSTRUCTOR_METHOD_NAME;
use crate::classfile::{
    ArithOp, Code, ConstantPool, GasCategory, IfCond, Insn, InvokeKind, JvmType, MethodInfo,
    MethodType, SlotType,
};
use crate::config::GasCostModel;
use crate::consts::{
    ALLOCATOR_PREFIX, CHARGE_CPU, CHARGE_RAM, CHECK_WHITE_LISTING_PREDICATE, MAX_COMPACT_CHARGE,
    RUNTIME_CLASS, VERIFIER_PREFIX,
};
use crate::error::{Error, Result};
use crate::verification::{dynamic_invoke_key, invoke_key, MethodObligations};
use std::collections::HashMap;

const CHECK_PREDICATE_DESCRIPTOR: &str = "(Ljava/lang/Object;Ljava/lang/Class;Ljava/lang/String;)V";

/// Routes obligated calls through `§check` forwarders. Runs before any other
/// body rewriting, on the methods the programmer wrote.
pub fn add_whitelist_checks(scope: &mut Instrumentation<'_>) -> Result<()> {
    let tags = scope.tags;
    let original_count = scope.class.methods.len();
    for m in 0..original_count {
        let Some(mut code) = scope.class.methods[m].code.take() else { continue };
        for i in 0..code.insns.len() {
            match code.insns[i].clone() {
                Insn::GetField(index)
                | Insn::PutField(index)
                | Insn::GetStatic(index)
                | Insn::PutStatic(index) => {
                    let (class, name, descriptor) = scope.class.pool.field_ref_at(index)?;
                    let key = invoke_key(class, name, descriptor);
                    if tags.field_obligations.contains(&key) {
                        return Err(Error::illegal_module(format!(
                            "field {key} carries a white-listing proof obligation"
                        )));
                    }
                }
                insn @ Insn::Invoke(..) | insn @ Insn::InvokeDynamic(_) => {
                    let Some(shape) = call_shape(&scope.class.pool, &scope.class.name, &insn)? else {
                        continue;
                    };
                    let Some(obligations) = tags.proof_obligations.get(&shape.key).cloned() else {
                        continue;
                    };
                    let forwarder = ensure_check_forwarder(scope, &shape, insn, &obligations)?;
                    let descriptor =
                        MethodType::new(shape.params.clone(), shape.ret.clone()).descriptor();
                    let own = scope.class.name.clone();
                    let forwarder_ref =
                        scope.class.pool.method_ref(&own, &forwarder, &descriptor)?;
                    code.insns[i] = Insn::Invoke(InvokeKind::Static, forwarder_ref);
                }
                _ => {}
            }
        }
        scope.class.methods[m].code = Some(code);
    }
    Ok(())
}

/// The canonical shape of a call site: its lookup key and the stacked
/// argument types (receiver included for instance calls).
struct CallShape {
    key: String,
    params: Vec<JvmType>,
    ret: JvmType,
}

fn call_shape(pool: &ConstantPool, own_class: &str, insn: &Insn) -> Result<Option<CallShape>> {
    match insn {
        Insn::Invoke(kind, index) => {
            let (class, name, descriptor) = pool.method_ref_at(*index)?;
            let key = invoke_key(class, name, descriptor);
            let method_type = MethodType::parse(descriptor)?;
            let mut params = Vec::with_capacity(method_type.params.len() + 1);
            if kind.has_receiver() {
                // a private method or a super.m() call needs the precise
                // receiver type for verification; plain calls use the
                // declared class
                let receiver = if *kind == InvokeKind::Special && name != CONSTRUCTOR_METHOD_NAME {
                    own_class.to_string()
                } else {
                    class.to_string()
                };
                params.push(JvmType::object(receiver));
            }
            params.extend(method_type.params);
            Ok(Some(CallShape { key, params, ret: method_type.ret }))
        }
        Insn::InvokeDynamic(index) => {
            let (bootstrap_index, name, descriptor) = pool.invoke_dynamic_at(*index)?;
            let key = dynamic_invoke_key(bootstrap_index, name, descriptor);
            let method_type = MethodType::parse(descriptor)?;
            Ok(Some(CallShape { key, params: method_type.params, ret: method_type.ret }))
        }
        _ => Ok(None),
    }
}

/// Returns the name of the check forwarder for a call shape, synthesizing it
/// on first use. Equivalent shapes must share one forwarder: a relocated
/// `invokedynamic` may appear in a single method body only once.
fn ensure_check_forwarder(
    scope: &mut Instrumentation<'_>,
    shape: &CallShape,
    call: Insn,
    obligations: &MethodObligations,
) -> Result<String> {
    if let Some(name) = scope.check_cache.get(&shape.key) {
        return Ok(name.clone());
    }

    let mut code = Code::new();
    let mut slot = 0u16;
    for (position, ty) in shape.params.iter().enumerate() {
        code.push(Insn::load(ty, slot));
        for obligation in obligations.values.iter().filter(|v| v.position == position) {
            match ty.slot_size() {
                2 => code.push(Insn::Dup2),
                _ => code.push(Insn::Dup),
            }
            box_if_primitive(&mut code, ty, &mut scope.class.pool)?;
            let predicate = scope.class.pool.class(&obligation.predicate)?;
            let description = scope.class.pool.string(&obligation.description)?;
            let check = scope.class.pool.method_ref(
                RUNTIME_CLASS,
                CHECK_WHITE_LISTING_PREDICATE,
                CHECK_PREDICATE_DESCRIPTOR,
            )?;
            code.extend([
                Insn::Ldc(predicate),
                Insn::Ldc(description),
                Insn::Invoke(InvokeKind::Static, check),
            ]);
        }
        slot += ty.slot_size();
    }
    if obligations.values.iter().any(|v| v.position >= shape.params.len()) {
        return Err(Error::illegal_module(format!(
            "proof obligation position out of range for {}",
            shape.key
        )));
    }
    code.push(call);
    code.push(Insn::ret(&shape.ret));

    let name = scope.fresh_synthetic(VERIFIER_PREFIX);
    let descriptor = MethodType::new(shape.params.clone(), shape.ret.clone());
    scope.class.methods.push(MethodInfo::new(
        ACC_PRIVATE | ACC_STATIC | ACC_SYNTHETIC,
        name.clone(),
        descriptor,
        code,
    ));
    scope.check_cache.insert(shape.key.clone(), name.clone());
    Ok(name)
}

/// The predicate check receives an `Object`, so primitive values are boxed
/// through the wrapper's `valueOf`.
fn box_if_primitive(code: &mut Code, ty: &JvmType, pool: &mut ConstantPool) -> Result<()> {
    let wrapper = match ty {
        JvmType::Boolean => "java/lang/Boolean",
        JvmType::Byte => "java/lang/Byte",
        JvmType::Char => "java/lang/Character",
        JvmType::Short => "java/lang/Short",
        JvmType::Int => "java/lang/Integer",
        JvmType::Long => "java/lang/Long",
        JvmType::Float => "java/lang/Float",
        JvmType::Double => "java/lang/Double",
        _ => return Ok(()),
    };
    let descriptor = format!("({})L{wrapper};", ty.descriptor());
    let value_of = pool.method_ref(wrapper, "valueOf", &descriptor)?;
    code.push(Insn::Invoke(InvokeKind::Static, value_of));
    Ok(())
}

/// Injects CPU and RAM charges into every method the programmer wrote.
/// Synthesized members are part of the metering machinery itself and are
/// skipped; the call that reaches them is charged at its call site.
pub fn add_gas_charges(scope: &mut Instrumentation<'_>) -> Result<()> {
    let mut allocators: HashMap<AllocKey, String> = HashMap::new();
    let method_count = scope.class.methods.len();
    for m in 0..method_count {
        if scope.class.methods[m].name.starts_with('§') {
            continue;
        }
        let Some(code) = scope.class.methods[m].code.take() else { continue };
        let code = meter_body(scope, code, &mut allocators)?;
        scope.class.methods[m].code = Some(code);
    }
    Ok(())
}

fn meter_body(
    scope: &mut Instrumentation<'_>,
    code: Code,
    allocators: &mut HashMap<AllocKey, String>,
) -> Result<Code> {
    let block_costs = block_cpu_costs(&scope.class.pool, scope.gas, &code)?;

    let mut out = code.clone();
    out.insns = Vec::with_capacity(code.insns.len());
    for (i, insn) in code.insns.iter().enumerate() {
        if insn.is_label() {
            // branch targets pay after the label, so jumps cannot skip the charge
            out.push(insn.clone());
            if let Some(&cost) = block_costs.get(&i) {
                out.extend(charge(&mut scope.class.pool, CHARGE_CPU, cost)?);
            }
            continue;
        }
        if let Some(&cost) = block_costs.get(&i) {
            out.extend(charge(&mut scope.class.pool, CHARGE_CPU, cost)?);
        }
        match insn {
            Insn::Invoke(kind, index) => {
                let (class, _, descriptor) = scope.class.pool.method_ref_at(*index)?;
                if class != RUNTIME_CLASS {
                    let slots = u64::from(MethodType::parse(descriptor)?.arg_slots())
                        + u64::from(kind.has_receiver());
                    let amount = scope.gas.ram_activation_record
                        + slots * scope.gas.ram_activation_slot;
                    out.extend(charge(&mut scope.class.pool, CHARGE_RAM, amount)?);
                }
                out.push(insn.clone());
            }
            Insn::InvokeDynamic(index) => {
                let (_, _, descriptor) = scope.class.pool.invoke_dynamic_at(*index)?;
                let slots = u64::from(MethodType::parse(descriptor)?.arg_slots());
                let amount =
                    scope.gas.ram_activation_record + slots * scope.gas.ram_activation_slot;
                out.extend(charge(&mut scope.class.pool, CHARGE_RAM, amount)?);
                out.push(insn.clone());
            }
            Insn::New(index) => {
                let class = scope.class.pool.class_name_at(*index)?;
                let fields = scope.tags.instance_fields_of.get(class).copied().unwrap_or(0);
                let amount = scope.gas.ram_object + u64::from(fields) * scope.gas.ram_field;
                out.extend(charge(&mut scope.class.pool, CHARGE_RAM, amount)?);
                out.push(insn.clone());
            }
            Insn::NewArray(_) | Insn::ANewArray(_) | Insn::MultiANewArray(..) => {
                let allocator = ensure_allocator(scope, allocators, insn)?;
                out.push(Insn::Invoke(InvokeKind::Static, allocator));
            }
            other => out.push(other.clone()),
        }
    }
    Ok(out)
}

/// CPU cost of each basic block of the body, keyed by the index of the
/// block's leader instruction. Zero-cost blocks are omitted.
fn block_cpu_costs(
    pool: &ConstantPool,
    gas: &GasCostModel,
    code: &Code,
) -> Result<HashMap<usize, u64>> {
    let referenced = code.referenced_labels();
    let mut leaders = vec![false; code.insns.len()];
    if !code.insns.is_empty() {
        leaders[0] = true;
    }
    for (i, insn) in code.insns.iter().enumerate() {
        if insn.ends_block() && i + 1 < code.insns.len() {
            leaders[i + 1] = true;
        }
        if let Insn::Label(label) = insn {
            if referenced.contains(label) {
                leaders[i] = true;
            }
        }
    }

    let mut costs = HashMap::new();
    let mut current_leader = None;
    for (i, insn) in code.insns.iter().enumerate() {
        if leaders[i] {
            current_leader = Some(i);
        }
        let Some(leader) = current_leader else { continue };
        let cost = cpu_cost(pool, gas, insn)?;
        if cost > 0 {
            *costs.entry(leader).or_insert(0) += cost;
        }
    }
    Ok(costs)
}

fn cpu_cost(pool: &ConstantPool, gas: &GasCostModel, insn: &Insn) -> Result<u64> {
    if insn.is_label() {
        return Ok(0);
    }
    // calls into the runtime support class are the metering itself
    if let Insn::Invoke(_, index) = insn {
        let (class, _, _) = pool.method_ref_at(*index)?;
        if class == RUNTIME_CLASS {
            return Ok(0);
        }
    }
    Ok(match insn.gas_category() {
        GasCategory::Arithmetic => gas.cpu_arithmetic,
        GasCategory::ArrayAccess => gas.cpu_array_access,
        GasCategory::FieldAccess => gas.cpu_field_access,
        GasCategory::Invoke => gas.cpu_invoke,
        GasCategory::Allocation => gas.cpu_allocation,
        GasCategory::Select => gas.cpu_select,
        GasCategory::Instruction => gas.cpu_instruction,
    })
}

/// Instructions charging the given amount through the runtime. Small amounts
/// use the pre-baked compact entry points, larger ones push a constant.
fn charge(pool: &mut ConstantPool, method: &str, amount: u64) -> Result<Vec<Insn>> {
    if amount == 0 {
        return Ok(Vec::new());
    }
    if amount <= MAX_COMPACT_CHARGE {
        let compact = pool.method_ref(RUNTIME_CLASS, &format!("{method}{amount}"), "()V")?;
        return Ok(vec![Insn::Invoke(InvokeKind::Static, compact)]);
    }
    if amount <= i32::MAX as u64 {
        let call = pool.method_ref(RUNTIME_CLASS, method, "(I)V")?;
        Ok(vec![Insn::Iconst(amount as i32), Insn::Invoke(InvokeKind::Static, call)])
    } else {
        let call = pool.method_ref(RUNTIME_CLASS, method, "(J)V")?;
        Ok(vec![Insn::Lconst(amount as i64), Insn::Invoke(InvokeKind::Static, call)])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum AllocKey {
    Primitive(u8),
    Reference(u16),
    Multi(u16, u8),
}

/// Returns a method reference to the allocator replacing the given array
/// allocation, synthesizing the allocator on first use per shape.
fn ensure_allocator(
    scope: &mut Instrumentation<'_>,
    allocators: &mut HashMap<AllocKey, String>,
    insn: &Insn,
) -> Result<u16> {
    let (alloc_key, dims, array_descriptor) = match insn {
        Insn::NewArray(atype) => {
            let descriptor = primitive_array_descriptor(*atype).ok_or_else(|| {
                Error::illegal_module(format!("invalid newarray type operand {atype}"))
            })?;
            (AllocKey::Primitive(*atype), 1u8, descriptor.to_string())
        }
        Insn::ANewArray(index) => {
            let element = scope.class.pool.class_name_at(*index)?;
            let descriptor = if element.starts_with('[') {
                format!("[{element}")
            } else {
                format!("[L{element};")
            };
            (AllocKey::Reference(*index), 1, descriptor)
        }
        Insn::MultiANewArray(index, dims) => {
            if *dims == 0 {
                return Err(Error::illegal_module("multianewarray with zero dimensions"));
            }
            (AllocKey::Multi(*index, *dims), *dims, scope.class.pool.class_name_at(*index)?.to_string())
        }
        _ => return Err(Error::codegen_error("allocator requested for a non-allocation")),
    };

    let descriptor = {
        let mut d = String::from("(");
        for _ in 0..dims {
            d.push('I');
        }
        d.push(')');
        d.push_str(&array_descriptor);
        d
    };
    let name = match allocators.get(&alloc_key) {
        Some(name) => name.clone(),
        None => {
            let name = synthesize_allocator(scope, insn, dims, &descriptor)?;
            allocators.insert(alloc_key, name.clone());
            name
        }
    };
    let own = scope.class.name.clone();
    scope.class.pool.method_ref(&own, &name, &descriptor)
}

/// Builds a `§alloc` method: charge RAM proportional to the requested
/// length, then allocate. Negative lengths skip the charge and fail inside
/// the allocation itself. Multi-dimensional allocations charge a
/// product-of-dimensions estimate in 64-bit arithmetic.
fn synthesize_allocator(
    scope: &mut Instrumentation<'_>,
    alloc: &Insn,
    dims: u8,
    descriptor: &str,
) -> Result<String> {
    let charge_ram = scope.class.pool.method_ref(RUNTIME_CLASS, CHARGE_RAM, "(J)V")?;
    let mut code = Code::new();
    let create = code.fresh_label();

    for slot in 0..u16::from(dims) {
        code.extend([Insn::Load(SlotType::Int, slot), Insn::If(IfCond::Lt, create)]);
    }
    code.extend([Insn::Load(SlotType::Int, 0), Insn::Convert(SlotType::Int, SlotType::Long)]);
    for slot in 1..u16::from(dims) {
        code.extend([
            Insn::Load(SlotType::Int, slot),
            Insn::Convert(SlotType::Int, SlotType::Long),
            Insn::Arith(SlotType::Long, ArithOp::Mul),
        ]);
    }
    code.extend([
        Insn::Lconst(scope.gas.ram_array_slot as i64),
        Insn::Arith(SlotType::Long, ArithOp::Mul),
        Insn::Lconst(scope.gas.ram_array as i64),
        Insn::Arith(SlotType::Long, ArithOp::Add),
        Insn::Invoke(InvokeKind::Static, charge_ram),
        Insn::Label(create),
    ]);
    for slot in 0..u16::from(dims) {
        code.push(Insn::Load(SlotType::Int, slot));
    }
    code.push(alloc.clone());
    code.push(Insn::Return(Some(SlotType::Ref)));

    let name = scope.fresh_synthetic(ALLOCATOR_PREFIX);
    scope.class.methods.push(MethodInfo::new(
        ACC_PRIVATE | ACC_STATIC | ACC_SYNTHETIC,
        name.clone(),
        MethodType::parse(descriptor)?,
        code,
    ));
    Ok(name)
}
