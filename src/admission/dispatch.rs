//! Pre-forward admission for interactive pod sub-resources.

use axum::http::request::Parts;
use kube::core::GroupVersionResource;
use metrics::counter;
use tracing::{debug, info};

use crate::admission::attributes::{AdmissionAttributes, ObjectInterfaces};
use crate::admission::connect::{ConnectSubresource, ParameterCodec};
use crate::admission::interfaces::{AdmissionInterface, Operation};
use crate::core::error::RedirectResult;
use crate::core::types::{username, RequestInfo, UserInfo};

/// Run admission for a redirected request, if it is a pod connect action
///
/// Only `pods/exec`, `pods/attach` and `pods/portforward` are checked; every other request,
/// and every request when no plugin handles `CONNECT`, passes untouched. Query decoding happens
/// before the plugin is consulted, so malformed options fail even without a validator.
/// Takes the request head only, so the body stays with the caller for forwarding.
pub async fn maybe_admit(
    request: &Parts,
    info: &RequestInfo,
    admission: Option<&dyn AdmissionInterface>,
    codec: &ParameterCodec,
    interfaces: &ObjectInterfaces,
) -> RedirectResult<()> {
    if info.resource != "pods" {
        return Ok(());
    }
    let Some(subresource) = ConnectSubresource::from_subresource(&info.subresource) else {
        return Ok(());
    };
    let Some(admission) = admission else {
        return Ok(());
    };
    if !admission.handles(Operation::Connect) {
        return Ok(());
    }

    let options = codec.decode_connect(subresource, request.uri.query())?;
    let user = request.extensions.get::<UserInfo>().cloned();

    let attributes = AdmissionAttributes::connect(
        options,
        &info.namespace,
        &info.name,
        GroupVersionResource::gvr(&info.api_group, &info.api_version, &info.resource),
        &info.subresource,
        user,
    );

    let Some(validator) = admission.as_validating() else {
        return Ok(());
    };

    debug!(
        namespace = %attributes.namespace,
        name = %attributes.name,
        subresource = subresource.as_str(),
        user = username(attributes.user_info.as_ref()),
        "Validating connect request"
    );

    if let Err(error) = validator.validate(&attributes, interfaces).await {
        info!(path = %request.uri.path(), error = %error, "Admission denied request");
        counter!("admission_denials_total", "subresource" => subresource.as_str()).increment(1);
        return Err(error.into());
    }

    Ok(())
}
