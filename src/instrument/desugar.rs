//! Desugaring of closures that reach context-requiring methods.
//!
//! A closure whose target is itself a context-requiring method gets a fresh
//! private instance forwarder and the bootstrap is repointed at it; a static
//! closure target that merely leads to one is converted into an instance
//! method in place. Either way the closure now captures the instrumented
//! object as implicit leading argument, and the bootstrap index is recorded
//! in [`Instrumentation::bootstraps_with_extra_context`] for the collaborators
//! that thread the context through the call sites.

use super::Instrumentation;
use crate::classfile::defs::access_flags::{ACC_PRIVATE, ACC_STATIC, ACC_SYNTHETIC};
use crate::classfile::defs::ref_kinds;
use crate::classfile::defs::CONSTRUCTOR_METHOD_NAME;
use crate::classfile::{Code, Insn, InvokeKind, JvmType, MethodInfo, MethodType, METAFACTORY_TARGET_ARG};
use crate::consts::LAMBDA_PREFIX;
use crate::error::{Error, Result};
use crate::verification::BootstrapTag;

/// Rewrites every bootstrap entry tagged by the verifier. Untagged entries
/// and entries beyond the verifier's table are left alone.
pub fn desugar_bootstraps(scope: &mut Instrumentation<'_>) -> Result<()> {
    let tags: Vec<(u16, BootstrapTag)> = scope
        .tags
        .bootstraps
        .iter()
        .enumerate()
        .take(scope.class.bootstrap_methods.len())
        .map(|(i, tag)| (i as u16, *tag))
        .collect();
    for (index, tag) in tags {
        match tag {
            BootstrapTag::Neither => {}
            BootstrapTag::IsContextRequiring => forward_to_target(scope, index)?,
            BootstrapTag::LeadsToContextRequiring => make_target_instance(scope, index)?,
        }
    }
    Ok(())
}

/// The (kind, class, name, descriptor) behind the target handle of a
/// bootstrap entry.
fn target_of(scope: &Instrumentation<'_>, index: u16) -> Result<(u8, String, String, String)> {
    let entry = &scope.class.bootstrap_methods[index as usize];
    let Some(&handle_index) = entry.args.get(METAFACTORY_TARGET_ARG) else {
        return Err(Error::illegal_module(format!(
            "{}: bootstrap {index} carries {} arguments, no target handle",
            scope.class.name,
            entry.args.len()
        )));
    };
    let (kind, ref_index) = scope.class.pool.method_handle_at(handle_index)?;
    let (class, name, descriptor) = scope.class.pool.method_ref_at(ref_index)?;
    Ok((kind, class.to_string(), name.to_string(), descriptor.to_string()))
}

fn invoke_kind_of(kind: u8, class_name: &str, bootstrap: u16) -> Result<InvokeKind> {
    match kind {
        ref_kinds::REF_INVOKE_VIRTUAL => Ok(InvokeKind::Virtual),
        ref_kinds::REF_INVOKE_STATIC => Ok(InvokeKind::Static),
        ref_kinds::REF_INVOKE_SPECIAL | ref_kinds::REF_NEW_INVOKE_SPECIAL => Ok(InvokeKind::Special),
        ref_kinds::REF_INVOKE_INTERFACE => Ok(InvokeKind::Interface),
        other => Err(Error::illegal_module(format!(
            "{class_name}: bootstrap {bootstrap} target handle has non-invocation kind {other}"
        ))),
    }
}

/// Case one: the closure target is itself context-requiring. A fresh private
/// instance method forwards all captured and explicit arguments positionally
/// to the target (constructing it for constructor references), and the
/// bootstrap's target handle is repointed at the forwarder.
fn forward_to_target(scope: &mut Instrumentation<'_>, index: u16) -> Result<()> {
    let (kind, class, name, descriptor) = target_of(scope, index)?;
    let invoke_kind = invoke_kind_of(kind, &scope.class.name, index)?;
    let target_type = MethodType::parse(&descriptor)?;
    let is_constructor = kind == ref_kinds::REF_NEW_INVOKE_SPECIAL || name == CONSTRUCTOR_METHOD_NAME;

    // the forwarder's parameters are the closure's stacked arguments: the
    // receiver of an instance target is explicit, a constructed target is not
    let mut params = Vec::new();
    if invoke_kind.has_receiver() && !is_constructor {
        params.push(JvmType::object(class.clone()));
    }
    params.extend(target_type.params.iter().cloned());
    let ret = if is_constructor { JvmType::object(class.clone()) } else { target_type.ret.clone() };
    let forwarder_type = MethodType::new(params, ret.clone());

    let target_ref = if invoke_kind == InvokeKind::Interface {
        scope.class.pool.interface_method_ref(&class, &name, &descriptor)?
    } else {
        scope.class.pool.method_ref(&class, &name, &descriptor)?
    };

    let mut code = Code::new();
    if is_constructor {
        let class_index = scope.class.pool.class(&class)?;
        code.push(Insn::New(class_index));
        code.push(Insn::Dup);
    }
    // slot 0 is the implicit receiver of the forwarder itself
    let mut slot = 1u16;
    for param in &forwarder_type.params {
        code.push(Insn::load(param, slot));
        slot += param.slot_size();
    }
    code.push(Insn::Invoke(invoke_kind, target_ref));
    code.push(Insn::ret(&ret));

    let forwarder_name = scope.fresh_synthetic(LAMBDA_PREFIX);
    let forwarder_descriptor = forwarder_type.descriptor();
    scope.class.methods.push(MethodInfo::new(
        ACC_PRIVATE | ACC_SYNTHETIC,
        forwarder_name.clone(),
        forwarder_type,
        code,
    ));

    repoint(scope, index, &forwarder_name, &forwarder_descriptor)?;
    scope.bootstraps_with_extra_context.insert(index);
    Ok(())
}

/// Case two: the closure target is a static method of this class that leads
/// to a context-requiring method. The method becomes an instance method,
/// every local slot shifting up to make room for the receiver, and the
/// target handle switches to instance dispatch.
fn make_target_instance(scope: &mut Instrumentation<'_>, index: u16) -> Result<()> {
    let (kind, class, name, descriptor) = target_of(scope, index)?;
    if kind != ref_kinds::REF_INVOKE_STATIC {
        return Err(Error::illegal_module(format!(
            "{}: bootstrap {index} leads to a context-requiring method but its target is not a static closure body",
            scope.class.name
        )));
    }
    if class != scope.class.name {
        return Err(Error::illegal_module(format!(
            "{}: bootstrap {index} targets static closure body {class}.{name}, declared elsewhere",
            scope.class.name
        )));
    }
    let own = scope.class.name.clone();
    let method = scope
        .class
        .methods
        .iter_mut()
        .find(|m| m.name == name && m.descriptor.descriptor() == descriptor)
        .ok_or_else(|| {
            Error::illegal_module(format!("{own}: bootstrap {index} targets missing method {name}{descriptor}"))
        })?;
    if !method.is_static() {
        return Err(Error::illegal_module(format!(
            "{own}: bootstrap {index} targets {name}{descriptor}, which is not static"
        )));
    }
    method.access_flags &= !ACC_STATIC;
    if let Some(code) = method.code.as_mut() {
        code.shift_locals(1);
    }

    repoint(scope, index, &name, &descriptor)?;
    scope.bootstraps_with_extra_context.insert(index);
    Ok(())
}

/// Points the bootstrap's target handle at an instance method of this class.
fn repoint(scope: &mut Instrumentation<'_>, index: u16, name: &str, descriptor: &str) -> Result<()> {
    let own = scope.class.name.clone();
    let method_ref = scope.class.pool.method_ref(&own, name, descriptor)?;
    let handle = scope.class.pool.method_handle(ref_kinds::REF_INVOKE_SPECIAL, method_ref)?;
    scope.class.bootstrap_methods[index as usize].args[METAFACTORY_TARGET_ARG] = handle;
    Ok(())
}
