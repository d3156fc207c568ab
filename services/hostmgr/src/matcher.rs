//! Pure host-filter matching rules.
//!
//! Status and hint handling live in the host summary; this module answers
//! the narrower question of whether a set of unreserved offers satisfies a
//! filter's demand.

use armada_api::{HostFilter, HostFilterResult, Offer};
use tracing::debug;

use crate::constraints::{EvaluateResult, Evaluator, HostLabelValues};
use crate::scalar::{has_resource_type, UnreservedSupply};

/// Matches one host's unreserved offers against a filter.
///
/// Rules, in order:
/// 1. No offers at all: [`HostFilterResult::NoOffer`].
/// 2. The host owns a declared scarce resource the filter does not request:
///    [`HostFilterResult::ScarceResources`] (scarce hosts are exclusive to
///    scarce demand).
/// 3. The scheduling constraint mismatches or fails to evaluate:
///    [`HostFilterResult::MismatchConstraints`].
/// 4. The aggregate supply falls short of the filter minimum, honoring
///    revocable separation: [`HostFilterResult::InsufficientOfferResources`].
pub fn match_host_filter(
    offers: &[Offer],
    filter: &HostFilter,
    evaluator: Option<&dyn Evaluator>,
    labels: &HostLabelValues,
    scarce_resource_types: &[String],
) -> HostFilterResult {
    if offers.is_empty() {
        return HostFilterResult::NoOffer;
    }

    let supply = UnreservedSupply::from_offers(offers);
    let minimum = &filter.resource_constraint.minimum;

    let host_total = supply.total();
    for scarce in scarce_resource_types {
        if has_resource_type(&host_total, scarce) && !has_resource_type(minimum, scarce) {
            return HostFilterResult::ScarceResources;
        }
    }

    if let Some(constraint) = &filter.scheduling_constraint {
        let Some(evaluator) = evaluator else {
            debug!("Scheduling constraint present but no evaluator supplied");
            return HostFilterResult::MismatchConstraints;
        };
        match evaluator.evaluate(constraint, labels) {
            Ok(EvaluateResult::Match) | Ok(EvaluateResult::NotApplicable) => {}
            Ok(EvaluateResult::Mismatch) => return HostFilterResult::MismatchConstraints,
            Err(error) => {
                debug!(%error, "Constraint evaluation failed");
                return HostFilterResult::MismatchConstraints;
            }
        }
    }

    if !supply.satisfies(
        minimum,
        filter.resource_constraint.num_ports,
        filter.resource_constraint.revocable,
    ) {
        return HostFilterResult::InsufficientOfferResources;
    }

    HostFilterResult::Match
}
