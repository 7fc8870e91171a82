use thin_vec::ThinVec;

use crate::cfg::{Body, OpPhi, PhiIncoming, Terminator, Value};

/// Makes every return of [body] branch to a new exit block that holds the only return.
///
/// For a function with a return type, a phi in the exit block selects the returned value by the
/// block control came from.
pub(super) fn merge_return(body: &mut Body) {
    let return_blocks = body.return_blocks();
    let exit = body.append_block();

    if let Some(ret_ty) = body.ret_ty {
        let result = body.add_value(ret_ty);
        let incoming: ThinVec<PhiIncoming> = return_blocks
            .iter()
            .map(|bb| {
                let value = match body.basic_blocks[*bb].terminator {
                    Terminator::ReturnValue(value) => value,
                    _ => Value::Undef(ret_ty),
                };

                PhiIncoming { value, block: *bb }
            })
            .collect();

        let data = &mut body.basic_blocks[exit];

        data.statements.push(OpPhi { incoming, result }.into());
        data.terminator = Terminator::ReturnValue(result.into());
    } else {
        body.basic_blocks[exit].terminator = Terminator::Return;
    }

    for bb in return_blocks {
        body.basic_blocks[bb].terminator = Terminator::Branch(exit);
    }
}
