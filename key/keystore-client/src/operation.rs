// Copyright (c) Microsoft. All rights reserved.

use keystore_common::{
    AuthorizationSet, Error, ErrorCode, FinishResult, OperationHandle, Purpose, UpdateResult,
};

/// An in-progress operation that is guaranteed to be terminated.
///
/// [`finish`](Operation::finish) and [`abort`](Operation::abort) consume the guard. If it is
/// dropped without either, the operation is aborted.
pub struct Operation<'a, C>
where
    C: crate::KeystoreClient + ?Sized,
{
    client: &'a C,
    handle: Option<OperationHandle>,
    output_parameters: AuthorizationSet,
}

impl<'a, C> Operation<'a, C>
where
    C: crate::KeystoreClient + ?Sized,
{
    pub fn begin(
        client: &'a C,
        purpose: Purpose,
        name: &str,
        input_parameters: &AuthorizationSet,
    ) -> Result<Self, Error> {
        let begin = client.begin_operation(purpose, name, input_parameters)?;

        Ok(Operation {
            client,
            handle: Some(begin.handle),
            output_parameters: begin.output_parameters,
        })
    }

    pub fn handle(&self) -> OperationHandle {
        self.handle
            .expect("handle is only taken by finish and abort, which consume self")
    }

    /// The parameters the service returned from begin, eg a generated nonce.
    pub fn begin_output_parameters(&self) -> &AuthorizationSet {
        &self.output_parameters
    }

    pub fn update(
        &mut self,
        input_parameters: &AuthorizationSet,
        input_data: &[u8],
    ) -> Result<UpdateResult, Error> {
        self.client
            .update_operation(self.handle(), input_parameters, input_data)
    }

    /// Feeds all of `input_data`, resubmitting whatever the service did not consume,
    /// and returns the concatenated output.
    ///
    /// `input_parameters` go with the first round only; resubmissions carry an empty set
    /// so that parameters such as associated data are applied once.
    ///
    /// A round that consumes nothing, or claims more than it was given, is reported as
    /// [`ErrorCode::InvalidInputLength`]. The operation stays open; dropping the guard aborts it.
    pub fn update_all(
        &mut self,
        input_parameters: &AuthorizationSet,
        mut input_data: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let no_parameters = AuthorizationSet::new();
        let mut round_parameters = input_parameters;
        let mut output = vec![];

        while !input_data.is_empty() {
            let update = self.update(round_parameters, input_data)?;
            round_parameters = &no_parameters;

            let remaining = match update.input_consumed {
                0 => None,
                consumed => input_data.get(consumed..),
            };
            let remaining = remaining.ok_or_else(|| {
                log::debug!(
                    "operation {} consumed {} of {} remaining bytes",
                    self.handle(),
                    update.input_consumed,
                    input_data.len()
                );
                Error::from(ErrorCode::InvalidInputLength)
            })?;

            output.extend_from_slice(&update.output);
            input_data = remaining;
        }

        Ok(output)
    }

    pub fn finish(
        mut self,
        input_parameters: &AuthorizationSet,
        signature_to_verify: &[u8],
    ) -> Result<FinishResult, Error> {
        let handle = self.take_handle();
        self.client
            .finish_operation(handle, input_parameters, signature_to_verify)
    }

    pub fn abort(mut self) -> Result<(), Error> {
        let handle = self.take_handle();
        self.client.abort_operation(handle)
    }

    fn take_handle(&mut self) -> OperationHandle {
        self.handle
            .take()
            .expect("handle is only taken by finish and abort, which consume self")
    }
}

impl<C> Drop for Operation<'_, C>
where
    C: crate::KeystoreClient + ?Sized,
{
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.client.abort_operation(handle) {
                log::warn!("could not abort abandoned operation {}: {}", handle, err);
            }
        }
    }
}

impl<C> std::fmt::Debug for Operation<'_, C>
where
    C: crate::KeystoreClient + ?Sized,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("handle", &self.handle)
            .finish()
    }
}
