//! Structural invariant checks on IL modules.
//!
//! The back-end trusts its input. These checks exist for debug builds and tests: they turn
//! a malformed module into an error up front instead of a confusing failure deep inside
//! scheduling or slot allocation.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    analysis::Liveness,
    il::{BlockId, FunctionId, Module, ValueId},
    Error, Result,
};

#[derive(Debug, Clone, Copy)]
enum DefSite {
    Entry,
    Phi(BlockId),
    Instruction(BlockId, usize),
}

/// Runs every structural check on every function of `module`.
///
/// # Errors
///
/// - [`Error::InvariantViolation`] for placeholders, phi arity mismatches, duplicate
///   definitions and inconsistent dominator annotations.
/// - [`Error::StrictnessViolation`] for uses not dominated by their definition.
pub fn verify_module(module: &Module) -> Result<()> {
    for (id, _) in module.functions() {
        verify_dominator_closure(module, id)?;
        verify_function(module, id)?;
    }
    Ok(())
}

fn def_sites(module: &Module, function: FunctionId) -> Result<HashMap<ValueId, DefSite>> {
    let mut sites = HashMap::new();
    let mut define = |value: ValueId, site: DefSite| {
        if sites.insert(value, site).is_some() {
            return Err(invariant_error!("value {} is defined more than once", value));
        }
        Ok(())
    };

    let func = module.function(function);
    for &value in func.parameters().iter().chain(func.globals_on_entry()) {
        define(value, DefSite::Entry)?;
    }
    for block_id in module.function_blocks(function) {
        let block = module.block(block_id);
        for phi in block.phis() {
            define(phi.result(), DefSite::Phi(block_id))?;
        }
        for (index, instr) in block.instructions().iter().enumerate() {
            for &def in instr.usedefs().defs() {
                define(def, DefSite::Instruction(block_id, index))?;
            }
        }
    }
    Ok(sites)
}

fn verify_function(module: &Module, function: FunctionId) -> Result<()> {
    let sites = def_sites(module, function)?;

    let check_placeholder = |value: ValueId| {
        if module.value(value).is_placeholder() {
            Err(invariant_error!("placeholder value {} survived construction", value))
        } else {
            Ok(())
        }
    };
    for &value in sites.keys() {
        check_placeholder(value)?;
    }

    for block_id in module.function_blocks(function) {
        let block = module.block(block_id);

        if !block.phis().is_empty() && block.predecessors().is_empty() {
            return Err(invariant_error!("phi nodes in {} without predecessors", block_id));
        }
        for phi in block.phis() {
            if phi.operands().len() != block.predecessors().len() {
                return Err(invariant_error!(
                    "phi {} in {} has {} operands for {} predecessors",
                    phi.result(),
                    block_id,
                    phi.operands().len(),
                    block.predecessors().len()
                ));
            }
            for op in phi.operands() {
                check_placeholder(op.value())?;
                if !block.predecessors().contains(&op.predecessor()) {
                    return Err(invariant_error!(
                        "phi {} in {} names {} which is not a predecessor",
                        phi.result(),
                        block_id,
                        op.predecessor()
                    ));
                }
                let dominated = match sites.get(&op.value()) {
                    Some(DefSite::Entry) => true,
                    Some(DefSite::Phi(def) | DefSite::Instruction(def, _)) => {
                        module.dominates(*def, op.predecessor())
                    }
                    None => false,
                };
                if !dominated {
                    return Err(Error::StrictnessViolation {
                        value: op.value(),
                        block: op.predecessor(),
                    });
                }
            }
        }

        for (index, instr) in block.instructions().iter().enumerate() {
            for &value in instr.usedefs().uses() {
                check_placeholder(value)?;
                let dominated = match sites.get(&value) {
                    Some(DefSite::Entry) => true,
                    Some(DefSite::Phi(def)) => module.dominates(*def, block_id),
                    Some(DefSite::Instruction(def, at)) if *def == block_id => *at < index,
                    Some(DefSite::Instruction(def, _)) => module.dominates(*def, block_id),
                    None => false,
                };
                if !dominated {
                    return Err(Error::StrictnessViolation {
                        value,
                        block: block_id,
                    });
                }
            }
        }

        if block.successors().len() == 2 {
            let branches = block
                .instructions()
                .iter()
                .filter(|i| i.op().is_terminator())
                .count();
            if branches != 1 {
                return Err(invariant_error!(
                    "two-way block {} must end in exactly one conditional jump",
                    block_id
                ));
            }
        }
        if block.successors().len() > 2 {
            return Err(invariant_error!("block {} has more than two successors", block_id));
        }
    }
    Ok(())
}

/// Checks that dominator annotations agree with the edges of `function`.
///
/// Every block reachable from the entry must be a dominator-tree descendant of it, each
/// `dominator`/`dominees` pair must agree, and for every edge `a -> b` the immediate
/// dominator of `b` must dominate `a`.
///
/// # Errors
///
/// Returns [`Error::InvariantViolation`] describing the first inconsistency.
pub fn verify_dominator_closure(module: &Module, function: FunctionId) -> Result<()> {
    let entry = module.function(function).entry();
    if module.block(entry).dominator().is_some() {
        return Err(invariant_error!("entry block {} has a dominator", entry));
    }

    let tree: HashSet<BlockId> = module.function_blocks(function).into_iter().collect();
    let mut seen = HashSet::from([entry]);
    let mut queue = VecDeque::from([entry]);
    while let Some(block_id) = queue.pop_front() {
        if !tree.contains(&block_id) {
            return Err(invariant_error!(
                "block {} is reachable but not in the dominator tree",
                block_id
            ));
        }
        let block = module.block(block_id);
        for &dominee in block.dominees() {
            if module.block(dominee).dominator() != Some(block_id) {
                return Err(invariant_error!(
                    "{} lists {} as dominee but it is dominated by {:?}",
                    block_id,
                    dominee,
                    module.block(dominee).dominator()
                ));
            }
        }
        for &succ in block.successors().iter().chain(block.throw_successors()) {
            if succ != entry {
                let idom = module.block(succ).dominator().ok_or_else(|| {
                    invariant_error!("block {} reachable from {} has no dominator", succ, block_id)
                })?;
                if !module.dominates(idom, block_id) {
                    return Err(invariant_error!(
                        "edge {} -> {} bypasses dominator {}",
                        block_id,
                        succ,
                        idom
                    ));
                }
            }
            if seen.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
    Ok(())
}

/// Checks that no block has two versions of one global live on entry or on exit.
///
/// # Errors
///
/// Returns [`Error::GlobalExclusivity`] for the first overlap found.
pub fn verify_global_exclusivity(module: &Module, liveness: &Liveness) -> Result<()> {
    for (function, _) in module.functions() {
        for block in module.function_blocks(function) {
            for set in [liveness.entry_live(block), liveness.exit_live(block)] {
                let mut seen = HashMap::new();
                for index in set.iter() {
                    let value = ValueId::new(index);
                    let variable = module.value(value).variable();
                    if !module.variable(variable).is_global() {
                        continue;
                    }
                    if seen.insert(variable, value).is_some() {
                        return Err(Error::GlobalExclusivity {
                            variable: module.variable(variable).name().to_string(),
                            block,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}
