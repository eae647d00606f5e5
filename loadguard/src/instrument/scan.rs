//! Load-site discovery

use crate::ir::{BlockId, FuncId, InsertPoint, InstKind, Module, Operand, SourceLoc};

use super::LocationKey;

/// One load instruction found in the module
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSite {
    pub func: FuncId,
    pub block: BlockId,
    /// Position of the load within its block at scan time
    pub index: usize,
    /// Address the load reads through
    pub addr: Operand,
    pub loc: Option<SourceLoc>,
}

impl LoadSite {
    pub fn key(&self) -> LocationKey {
        LocationKey::new(self.loc)
    }

    /// Immediately before the load, as of scan time
    pub fn insert_point(&self) -> InsertPoint {
        InsertPoint {
            func: self.func,
            block: self.block,
            index: self.index,
        }
    }
}

/// Every load in the module, in function, block, then instruction order
pub fn scan_loads(module: &Module) -> Vec<LoadSite> {
    let mut sites = Vec::new();

    for (f, func) in module.functions.iter().enumerate() {
        for (b, block) in func.blocks.iter().enumerate() {
            for (i, inst) in block.instructions.iter().enumerate() {
                if let InstKind::Load { addr, .. } = &inst.kind {
                    sites.push(LoadSite {
                        func: FuncId(f),
                        block: BlockId(b),
                        index: i,
                        addr: addr.clone(),
                        loc: inst.loc,
                    });
                }
            }
        }
    }

    sites
}
