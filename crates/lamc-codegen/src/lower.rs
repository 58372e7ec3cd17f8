//! Lowers hoisted functions to LLVM IR.
//!
//! Calling convention: every function returns `i64`; the first parameter of
//! a closure-converted function is the closure address and lowers as an
//! opaque pointer, all further parameters are `i64`. Locals are SSA values
//! tracked in a per-function name map. A block that declares a slot gets an
//! `alloca` spill slot in the entry block; jumps into it store the passed
//! value, and the block starts by loading it back -- `mem2reg` turns this
//! into phi nodes if optimization runs.
//!
//! Values cross the int/pointer boundary freely (a closure address is an
//! `i64` in a tuple slot and a pointer at a call), so emission coerces with
//! `ptrtoint`/`inttoptr` at each use site.

use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::{BasicMetadataTypeEnum, FunctionType};
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum, IntValue, PointerValue};
use inkwell::{AddressSpace, IntPredicate};

use lamc_core::anf::{Exp, Value};
use lamc_core::ast::Bop;
use lamc_core::hoist::{Block as IrBlock, Function as IrFunction};

use crate::error::CodegenError;

/// Builds the LLVM module for `functions` into `module`.
///
/// Two passes: declare every function first so call sites and `Glob` values
/// can resolve forward references, then emit bodies.
pub fn lower_module<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    builder: &Builder<'ctx>,
    functions: &[IrFunction],
) -> Result<(), CodegenError> {
    declare_malloc(context, module);
    for function in functions {
        module.add_function(&function.name, fn_type(context, function.params.len()), None);
    }
    for function in functions {
        FunctionLowerer::new(context, module, builder).lower_function(function)?;
    }
    Ok(())
}

/// Lowers `functions` into a fresh module and returns its textual IR.
pub fn lower_to_ir(functions: &[IrFunction]) -> Result<String, CodegenError> {
    let context = Context::create();
    let module = context.create_module("lamc_program");
    let builder = context.create_builder();
    lower_module(&context, &module, &builder, functions)?;
    module
        .verify()
        .map_err(|e| CodegenError::Llvm(e.to_string()))?;
    Ok(module.print_to_string().to_string())
}

/// `ptr fn(i64)`, resolved by the JIT to the process allocator.
fn declare_malloc<'ctx>(context: &'ctx Context, module: &Module<'ctx>) {
    if module.get_function("malloc").is_none() {
        let ptr = context.ptr_type(AddressSpace::default());
        let ty = ptr.fn_type(&[context.i64_type().into()], false);
        module.add_function("malloc", ty, None);
    }
}

/// `i64 fn(ptr, i64, i64, ...)` -- pointer closure first, integers after.
fn fn_type(context: &Context, param_count: usize) -> FunctionType<'_> {
    let i64_type = context.i64_type();
    let mut params: Vec<BasicMetadataTypeEnum> = Vec::with_capacity(param_count);
    for i in 0..param_count {
        if i == 0 {
            params.push(context.ptr_type(AddressSpace::default()).into());
        } else {
            params.push(i64_type.into());
        }
    }
    i64_type.fn_type(&params, false)
}

/// Per-function emission state.
struct FunctionLowerer<'a, 'ctx> {
    context: &'ctx Context,
    module: &'a Module<'ctx>,
    builder: &'a Builder<'ctx>,
    values: HashMap<String, BasicValueEnum<'ctx>>,
    blocks: HashMap<String, BasicBlock<'ctx>>,
    slots: HashMap<String, PointerValue<'ctx>>,
}

impl<'a, 'ctx> FunctionLowerer<'a, 'ctx> {
    fn new(
        context: &'ctx Context,
        module: &'a Module<'ctx>,
        builder: &'a Builder<'ctx>,
    ) -> FunctionLowerer<'a, 'ctx> {
        FunctionLowerer {
            context,
            module,
            builder,
            values: HashMap::new(),
            blocks: HashMap::new(),
            slots: HashMap::new(),
        }
    }

    fn lower_function(mut self, function: &IrFunction) -> Result<(), CodegenError> {
        let llvm_fn = self
            .module
            .get_function(&function.name)
            .ok_or_else(|| CodegenError::UnknownFunction(function.name.clone()))?;

        let entry = self
            .context
            .append_basic_block(llvm_fn, &function.entry.name);
        self.blocks.insert(function.entry.name.clone(), entry);
        self.builder.position_at_end(entry);

        // Create all blocks up front so jumps resolve in any order, and give
        // every slot-carrying block its spill alloca while the builder still
        // points at the entry block.
        for block in &function.blocks {
            let bb = self.context.append_basic_block(llvm_fn, &block.name);
            self.blocks.insert(block.name.clone(), bb);
            if block.slot.is_some() {
                let slot = self
                    .builder
                    .build_alloca(self.context.i64_type(), &block.name)
                    .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                self.slots.insert(block.name.clone(), slot);
            }
        }

        for (i, param) in function.params.iter().enumerate() {
            let arg = llvm_fn
                .get_nth_param(i as u32)
                .ok_or_else(|| CodegenError::Llvm(format!("missing parameter {}", param)))?;
            arg.set_name(param);
            self.values.insert(param.clone(), arg);
        }

        self.lower_block(&function.entry)?;
        for block in &function.blocks {
            self.lower_block(block)?;
        }
        Ok(())
    }

    fn lower_block(&mut self, block: &IrBlock) -> Result<(), CodegenError> {
        let bb = self.blocks[&block.name];
        self.builder.position_at_end(bb);
        if let Some(slot_name) = &block.slot {
            let slot = self.slots[&block.name];
            let loaded = self
                .builder
                .build_load(self.context.i64_type(), slot, slot_name)
                .map_err(|e| CodegenError::Llvm(e.to_string()))?;
            self.values.insert(slot_name.clone(), loaded);
        }
        self.lower_exp(&block.body)
    }

    /// Emits one tail-form body. Straight-line bindings loop along their
    /// `rest` chains; `Halt`, `Jump`, and `If` terminate the block.
    fn lower_exp(&mut self, exp: &Exp) -> Result<(), CodegenError> {
        let mut exp = exp;
        loop {
            match exp {
                Exp::Halt { value } => {
                    let value = self.int_value(value, "ret")?;
                    self.builder
                        .build_return(Some(&value))
                        .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                    return Ok(());
                }
                Exp::Jump {
                    join_name,
                    slot_value,
                } => {
                    self.store_slot(join_name, slot_value)?;
                    let target = *self
                        .blocks
                        .get(join_name)
                        .ok_or_else(|| CodegenError::UnknownBlock(join_name.clone()))?;
                    self.builder
                        .build_unconditional_branch(target)
                        .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                    return Ok(());
                }
                Exp::If { cond, then, els } => {
                    let (Exp::Jump { join_name: then_name, slot_value: then_value },
                         Exp::Jump { join_name: else_name, slot_value: else_value }) =
                        (then.as_ref(), els.as_ref())
                    else {
                        return Err(CodegenError::UnsplitIf);
                    };
                    let cond = self.int_value(cond, "cond")?;
                    let flag = self
                        .builder
                        .build_int_compare(
                            IntPredicate::NE,
                            cond,
                            self.context.i64_type().const_zero(),
                            "ifcond",
                        )
                        .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                    // Stores are emitted before the branch; only the taken
                    // block reads its slot.
                    self.store_slot(then_name, then_value)?;
                    self.store_slot(else_name, else_value)?;
                    let then_bb = *self
                        .blocks
                        .get(then_name)
                        .ok_or_else(|| CodegenError::UnknownBlock(then_name.clone()))?;
                    let else_bb = *self
                        .blocks
                        .get(else_name)
                        .ok_or_else(|| CodegenError::UnknownBlock(else_name.clone()))?;
                    self.builder
                        .build_conditional_branch(flag, then_bb, else_bb)
                        .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                    return Ok(());
                }
                Exp::App {
                    name,
                    fun_name,
                    args,
                    rest,
                } => {
                    self.lower_app(name, fun_name, args)?;
                    exp = rest;
                }
                Exp::Bop {
                    name,
                    op,
                    lhs,
                    rhs,
                    rest,
                } => {
                    let lhs = self.int_value(lhs, "lhs")?;
                    let rhs = self.int_value(rhs, "rhs")?;
                    let result = match op {
                        Bop::Plus => self.builder.build_int_add(lhs, rhs, name),
                        Bop::Minus => self.builder.build_int_sub(lhs, rhs, name),
                        Bop::Times => self.builder.build_int_mul(lhs, rhs, name),
                    }
                    .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                    self.values.insert(name.clone(), result.into());
                    exp = rest;
                }
                Exp::Tuple { name, values, rest } => {
                    self.lower_tuple(name, values)?;
                    exp = rest;
                }
                Exp::Proj {
                    name,
                    tuple,
                    index,
                    rest,
                } => {
                    let tuple = self.lookup(tuple)?;
                    let tuple = self.as_ptr(tuple, "tupleptr")?;
                    let slot = self.gep(tuple, *index as u64, name)?;
                    let loaded = self
                        .builder
                        .build_load(self.context.i64_type(), slot, name)
                        .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                    self.values.insert(name.clone(), loaded);
                    exp = rest;
                }
                Exp::Fun { .. } | Exp::Join { .. } => return Err(CodegenError::Unhoisted),
            }
        }
    }

    fn lower_app(
        &mut self,
        name: &str,
        fun_name: &str,
        args: &[Value],
    ) -> Result<(), CodegenError> {
        let mut lowered: Vec<BasicMetadataValueEnum<'ctx>> = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let value = self.lower_value(arg)?;
            if i == 0 {
                lowered.push(self.as_ptr(value, "cls")?.into());
            } else {
                lowered.push(self.as_int(value, "arg")?.into());
            }
        }
        let call = if let Some(&callee) = self.values.get(fun_name) {
            // Local value: an extracted code pointer; call indirectly.
            let callee = self.as_ptr(callee, fun_name)?;
            self.builder
                .build_indirect_call(fn_type(self.context, args.len()), callee, &lowered, name)
        } else if let Some(callee) = self.module.get_function(fun_name) {
            self.builder.build_call(callee, &lowered, name)
        } else {
            return Err(CodegenError::UnknownFunction(fun_name.to_string()));
        }
        .map_err(|e| CodegenError::Llvm(e.to_string()))?;
        let result = call
            .try_as_basic_value()
            .left()
            .ok_or_else(|| CodegenError::Llvm("call produced no value".to_string()))?;
        self.values.insert(name.to_string(), result);
        Ok(())
    }

    fn lower_tuple(&mut self, name: &str, values: &[Value]) -> Result<(), CodegenError> {
        let i64_type = self.context.i64_type();
        let malloc = self
            .module
            .get_function("malloc")
            .ok_or_else(|| CodegenError::UnknownFunction("malloc".to_string()))?;
        let bytes = i64_type.const_int((values.len() * 8) as u64, false);
        let call = self
            .builder
            .build_call(malloc, &[bytes.into()], name)
            .map_err(|e| CodegenError::Llvm(e.to_string()))?;
        let ptr = call
            .try_as_basic_value()
            .left()
            .ok_or_else(|| CodegenError::Llvm("malloc produced no value".to_string()))?
            .into_pointer_value();
        for (i, value) in values.iter().enumerate() {
            let slot = self.gep(ptr, i as u64, "slot")?;
            let value = self.int_value(value, "elem")?;
            self.builder
                .build_store(slot, value)
                .map_err(|e| CodegenError::Llvm(e.to_string()))?;
        }
        let address = self
            .builder
            .build_ptr_to_int(ptr, i64_type, name)
            .map_err(|e| CodegenError::Llvm(e.to_string()))?;
        self.values.insert(name.to_string(), address.into());
        Ok(())
    }

    fn store_slot(
        &mut self,
        join_name: &str,
        slot_value: &Option<Value>,
    ) -> Result<(), CodegenError> {
        let Some(value) = slot_value else {
            return Ok(());
        };
        let slot = *self
            .slots
            .get(join_name)
            .ok_or_else(|| CodegenError::UnknownBlock(join_name.to_string()))?;
        let value = self.int_value(value, "jumpval")?;
        self.builder
            .build_store(slot, value)
            .map_err(|e| CodegenError::Llvm(e.to_string()))?;
        Ok(())
    }

    fn gep(
        &self,
        ptr: PointerValue<'ctx>,
        index: u64,
        name: &str,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        let i64_type = self.context.i64_type();
        // SAFETY: tuple slots are allocated as `count * 8` bytes and every
        // projection index is within the tuple the middle end built.
        unsafe {
            self.builder
                .build_gep(i64_type, ptr, &[i64_type.const_int(index, false)], name)
        }
        .map_err(|e| CodegenError::Llvm(e.to_string()))
    }

    fn lookup(&self, name: &str) -> Result<BasicValueEnum<'ctx>, CodegenError> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::UnknownValue(name.to_string()))
    }

    fn lower_value(&self, value: &Value) -> Result<BasicValueEnum<'ctx>, CodegenError> {
        match value {
            Value::Int(n) => Ok(self.context.i64_type().const_int(*n as u64, false).into()),
            Value::Var(name) => self.lookup(name),
            Value::Glob(name) => {
                let function = self
                    .module
                    .get_function(name)
                    .ok_or_else(|| CodegenError::UnknownFunction(name.clone()))?;
                let address = self
                    .builder
                    .build_ptr_to_int(
                        function.as_global_value().as_pointer_value(),
                        self.context.i64_type(),
                        name,
                    )
                    .map_err(|e| CodegenError::Llvm(e.to_string()))?;
                Ok(address.into())
            }
        }
    }

    /// Lowers a value and coerces it to `i64`.
    fn int_value(&self, value: &Value, name: &str) -> Result<IntValue<'ctx>, CodegenError> {
        let value = self.lower_value(value)?;
        self.as_int(value, name)
    }

    fn as_int(
        &self,
        value: BasicValueEnum<'ctx>,
        name: &str,
    ) -> Result<IntValue<'ctx>, CodegenError> {
        match value {
            BasicValueEnum::IntValue(value) => Ok(value),
            BasicValueEnum::PointerValue(value) => self
                .builder
                .build_ptr_to_int(value, self.context.i64_type(), name)
                .map_err(|e| CodegenError::Llvm(e.to_string())),
            other => Err(CodegenError::Llvm(format!(
                "expected an integer-compatible value, found {:?}",
                other
            ))),
        }
    }

    fn as_ptr(
        &self,
        value: BasicValueEnum<'ctx>,
        name: &str,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        match value {
            BasicValueEnum::PointerValue(value) => Ok(value),
            BasicValueEnum::IntValue(value) => self
                .builder
                .build_int_to_ptr(value, self.context.ptr_type(AddressSpace::default()), name)
                .map_err(|e| CodegenError::Llvm(e.to_string())),
            other => Err(CodegenError::Llvm(format!(
                "expected a pointer-compatible value, found {:?}",
                other
            ))),
        }
    }
}
